//! Source fetching seam.
//!
//! Actual network fetching lives outside this crate. Callers implement
//! `SourceFetcher`; the `ingest` command feeds the pipeline from a
//! pre-fetched JSON batch file through `BatchFetcher`, which is also what
//! the test suite uses.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SourceSpec;
use crate::models::ObservedItem;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("fetch timed out after {0}s")]
    Timeout(u64),
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceSpec) -> Result<Vec<ObservedItem>, FetchError>;
}

/// On-disk batch format: one crawl's worth of observations for any number
/// of sources, as produced by an external fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlBatch {
    /// Crawl instant in unix seconds; falls back to wall clock when absent.
    #[serde(default)]
    pub crawl_time: Option<i64>,
    pub sources: Vec<SourceBatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBatch {
    pub source: String,
    #[serde(default)]
    pub name: String,
    pub items: Vec<ObservedItem>,
}

impl CrawlBatch {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
        let batch: CrawlBatch =
            serde_json::from_str(&content).with_context(|| "Failed to parse batch file")?;
        Ok(batch)
    }

    /// Source specs implied by the batch itself.
    pub fn source_specs(&self) -> Vec<SourceSpec> {
        self.sources
            .iter()
            .map(|b| SourceSpec {
                id: b.source.clone(),
                name: b.name.clone(),
                active: true,
            })
            .collect()
    }
}

/// Fetcher backed by a pre-fetched batch. A source with no entry in the
/// batch reports a parse failure, which the pipeline records as a failed
/// source outcome.
pub struct BatchFetcher {
    by_source: HashMap<String, Vec<ObservedItem>>,
}

impl BatchFetcher {
    pub fn new(batch: &CrawlBatch) -> Self {
        let by_source = batch
            .sources
            .iter()
            .map(|b| (b.source.clone(), b.items.clone()))
            .collect();
        Self { by_source }
    }
}

#[async_trait]
impl SourceFetcher for BatchFetcher {
    async fn fetch(&self, source: &SourceSpec) -> Result<Vec<ObservedItem>, FetchError> {
        self.by_source
            .get(&source.id)
            .cloned()
            .ok_or_else(|| FetchError::Parse(format!("no batch entry for source '{}'", source.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{obs, source};

    #[tokio::test]
    async fn batch_fetcher_serves_items_by_source() {
        let batch = CrawlBatch {
            crawl_time: Some(1000),
            sources: vec![SourceBatch {
                source: "hn".to_string(),
                name: "Hacker News".to_string(),
                items: vec![obs("A", 1, "https://a/1")],
            }],
        };
        let fetcher = BatchFetcher::new(&batch);

        let items = fetcher.fetch(&source("hn")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "A");

        let err = fetcher.fetch(&source("rd")).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));

        let specs = batch.source_specs();
        assert_eq!(specs[0].id, "hn");
        assert_eq!(specs[0].display_name(), "Hacker News");
    }
}
