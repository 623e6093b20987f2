//! Crawl pipeline orchestration: freshness check, per-source fetch and
//! ingest, then one ledger entry covering the whole run.
//!
//! A source that fails to fetch is recorded as a failed outcome and never
//! aborts the run; the other sources' batches still land.

use sqlx::SqlitePool;

use crate::config::SourceSpec;
use crate::error::StoreError;
use crate::fetch::SourceFetcher;
use crate::ingest::ingest_source_batch;
use crate::ledger::{self, RunDecision};
use crate::models::{CrawlRun, Disposition, SourceOutcome};

#[derive(Debug, Clone, Default)]
pub struct CrawlTally {
    pub inserted: usize,
    pub updated: usize,
    pub title_changes: usize,
    pub sources_ok: usize,
    pub sources_failed: usize,
}

#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    Completed { run: CrawlRun, tally: CrawlTally },
    Skipped { last_run: i64, age_secs: i64 },
}

pub async fn run_crawl(
    pool: &SqlitePool,
    sources: &[SourceSpec],
    fetcher: &dyn SourceFetcher,
    crawl_time: i64,
    freshness_window_secs: i64,
    force: bool,
) -> Result<CrawlOutcome, StoreError> {
    if !force {
        if let RunDecision::Skip { last_run, age_secs } =
            ledger::should_run(pool, crawl_time, freshness_window_secs).await?
        {
            return Ok(CrawlOutcome::Skipped { last_run, age_secs });
        }
    }

    let mut tally = CrawlTally::default();
    let mut outcomes = Vec::with_capacity(sources.len());
    let mut total_items: i64 = 0;

    for source in sources.iter().filter(|s| s.active) {
        match fetcher.fetch(source).await {
            Ok(observed) => {
                let item_outcomes =
                    ingest_source_batch(pool, crawl_time, source, &observed).await?;
                for outcome in &item_outcomes {
                    match outcome.disposition {
                        Disposition::Inserted => tally.inserted += 1,
                        Disposition::Updated => tally.updated += 1,
                        Disposition::UpdatedTitleChanged => {
                            tally.updated += 1;
                            tally.title_changes += 1;
                        }
                    }
                }
                total_items += item_outcomes.len() as i64;
                tally.sources_ok += 1;
                outcomes.push((source.id.clone(), SourceOutcome::Success));
            }
            Err(_) => {
                tally.sources_failed += 1;
                outcomes.push((source.id.clone(), SourceOutcome::Failed));
            }
        }
    }

    let run = ledger::record_run(pool, crawl_time, &outcomes, total_items).await?;
    Ok(CrawlOutcome::Completed { run, tally })
}
