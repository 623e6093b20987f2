//! Typed storage errors.
//!
//! Structural violations (double-triggered runs, double gate commits) are
//! surfaced to the caller; per-item uniqueness races are recovered inside the
//! ingestion engine and never appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A crawl run was already recorded for this crawl time. Signals a
    /// caller-level double-trigger; not retried internally.
    #[error("crawl run already recorded for crawl_time {crawl_time}")]
    DuplicateRun { crawl_time: i64 },

    /// The delivery record for this period was already committed.
    #[error("delivery already committed for period {period_key}")]
    DuplicateCommit { period_key: String },

    #[error("unknown item: {id}")]
    UnknownItem { id: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
