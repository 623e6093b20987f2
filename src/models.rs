//! Core data models used throughout Trend Ledger.
//!
//! These types represent observed items flowing into the ingestion engine,
//! the stored entities they become, and the run/gate bookkeeping records.

use serde::{Deserialize, Serialize};

/// One item as observed by a source fetcher, before it reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedItem {
    pub title: String,
    pub rank: i64,
    /// Canonical URL. Empty means the source provides no stable identity and
    /// every observation becomes a new row.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub alt_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A tracked item as stored, with its denormalized "current" fields.
#[derive(Debug, Clone, Serialize)]
pub struct StoredItem {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub rank: i64,
    pub url: String,
    pub alt_url: String,
    pub tags: Vec<String>,
    pub first_seen: i64,
    pub last_seen: i64,
    pub seen_count: i64,
}

/// How the ingestion engine disposed of one observed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inserted,
    Updated,
    UpdatedTitleChanged,
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item_id: String,
    pub disposition: Disposition,
}

/// One recorded execution of the ingestion pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlRun {
    pub id: String,
    pub crawl_time: i64,
    pub total_items: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    Success,
    Failed,
}

impl SourceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOutcome::Success => "success",
            SourceOutcome::Failed => "failed",
        }
    }
}

/// One rank observation in an item's append-only history.
#[derive(Debug, Clone, Serialize)]
pub struct RankSample {
    pub rank: i64,
    pub observed_at: i64,
}

/// One title drift record in an item's append-only history.
#[derive(Debug, Clone, Serialize)]
pub struct TitleChange {
    pub old_title: String,
    pub new_title: String,
    pub changed_at: i64,
}

/// One externally fetched public reaction. Sentiment label and score are
/// supplied by an external scorer; there is no dedup key, so re-submitting
/// the same reaction creates another row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpinionRecord {
    pub origin: String,
    pub text: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub upvotes: i64,
    pub sentiment_label: String,
    pub sentiment_score: f64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub published_at: i64,
}

/// Append-only aggregate of linked opinions for one (item, topic).
#[derive(Debug, Clone, Serialize)]
pub struct SentimentSummary {
    pub id: String,
    pub item_id: String,
    pub topic: String,
    pub overall_sentiment: String,
    pub avg_score: f64,
    pub opinion_count: i64,
    pub narrative: String,
    pub generated_at: i64,
}

/// Rendered highlight set for one (date, window) pair. Regenerating appends;
/// "current" is the most recent row.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodDigest {
    pub id: String,
    pub date: String,
    pub window_label: String,
    pub highlights: Vec<String>,
    pub top_categories: Vec<String>,
    pub item_count: i64,
    pub generated_at: i64,
}

/// Gate state for one delivery period.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStatus {
    pub period_key: String,
    pub delivered: bool,
    pub delivered_at: Option<i64>,
    pub report_kind: Option<String>,
}
