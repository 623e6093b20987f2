//! Crawl ledger.
//!
//! Records each pipeline execution together with per-source outcomes, and
//! answers the freshness question: has a run happened recently enough that
//! another one is pointless right now? The answer is advisory; callers can
//! force a run past it.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::WriteTx;
use crate::error::{is_unique_violation, StoreError};
use crate::models::{CrawlRun, SourceOutcome};

/// Outcome of the freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDecision {
    Run,
    Skip { last_run: i64, age_secs: i64 },
}

/// Advisory freshness gate: skip when the newest recorded run is younger
/// than `freshness_window_secs`.
pub async fn should_run(
    pool: &SqlitePool,
    now: i64,
    freshness_window_secs: i64,
) -> Result<RunDecision, StoreError> {
    let last: Option<i64> = sqlx::query_scalar("SELECT MAX(crawl_time) FROM crawl_runs")
        .fetch_one(pool)
        .await?;

    match last {
        Some(last_run) if now - last_run < freshness_window_secs => Ok(RunDecision::Skip {
            last_run,
            age_secs: now - last_run,
        }),
        _ => Ok(RunDecision::Run),
    }
}

/// Record a completed run and its per-source outcomes, all or nothing.
///
/// `crawl_time` is the run's identity: a second record for the same instant
/// is a caller-level double-trigger and surfaces as `DuplicateRun` with no
/// partial outcome rows left behind.
pub async fn record_run(
    pool: &SqlitePool,
    crawl_time: i64,
    outcomes: &[(String, SourceOutcome)],
    total_items: i64,
) -> Result<CrawlRun, StoreError> {
    let mut tx = WriteTx::begin(pool).await?;
    let run_id = Uuid::new_v4().to_string();

    let inserted = sqlx::query(
        "INSERT INTO crawl_runs (id, crawl_time, total_items, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&run_id)
    .bind(crawl_time)
    .bind(total_items)
    .bind(crawl_time)
    .execute(tx.conn())
    .await;

    if let Err(err) = inserted {
        let _ = tx.rollback().await;
        if is_unique_violation(&err) {
            return Err(StoreError::DuplicateRun { crawl_time });
        }
        return Err(err.into());
    }

    for (source_id, outcome) in outcomes {
        let result =
            sqlx::query("INSERT INTO source_outcomes (run_id, source_id, outcome) VALUES (?, ?, ?)")
                .bind(&run_id)
                .bind(source_id)
                .bind(outcome.as_str())
                .execute(tx.conn())
                .await;
        if let Err(err) = result {
            let _ = tx.rollback().await;
            return Err(err.into());
        }
    }

    tx.commit().await?;
    Ok(CrawlRun {
        id: run_id,
        crawl_time,
        total_items,
    })
}

/// All recorded run times, oldest first.
pub async fn crawl_times(pool: &SqlitePool) -> Result<Vec<i64>, StoreError> {
    let times = sqlx::query_scalar("SELECT crawl_time FROM crawl_runs ORDER BY crawl_time")
        .fetch_all(pool)
        .await?;
    Ok(times)
}

pub async fn is_first_run(pool: &SqlitePool) -> Result<bool, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM crawl_runs")
        .fetch_one(pool)
        .await?;
    Ok(count == 0)
}

/// Per-source outcomes for one run, for reporting.
pub async fn run_outcomes(
    pool: &SqlitePool,
    run_id: &str,
) -> Result<Vec<(String, SourceOutcome)>, StoreError> {
    let rows = sqlx::query(
        "SELECT source_id, outcome FROM source_outcomes WHERE run_id = ? ORDER BY source_id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let outcome = match row.get::<String, _>("outcome").as_str() {
                "failed" => SourceOutcome::Failed,
                _ => SourceOutcome::Success,
            };
            (row.get("source_id"), outcome)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_pool;

    #[tokio::test]
    async fn freshness_gate_skips_recent_runs() {
        let (_tmp, pool) = test_pool().await;

        assert_eq!(should_run(&pool, 5000, 3600).await.unwrap(), RunDecision::Run);
        assert!(is_first_run(&pool).await.unwrap());

        record_run(&pool, 5000, &[], 0).await.unwrap();

        assert_eq!(
            should_run(&pool, 5000 + 3599, 3600).await.unwrap(),
            RunDecision::Skip {
                last_run: 5000,
                age_secs: 3599
            }
        );
        assert_eq!(
            should_run(&pool, 5000 + 3600, 3600).await.unwrap(),
            RunDecision::Run
        );
        assert!(!is_first_run(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn run_records_mixed_outcomes() {
        let (_tmp, pool) = test_pool().await;

        let run = record_run(
            &pool,
            7000,
            &[
                ("hn".to_string(), SourceOutcome::Success),
                ("rd".to_string(), SourceOutcome::Failed),
            ],
            42,
        )
        .await
        .unwrap();

        let outcomes = run_outcomes(&pool, &run.id).await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                ("hn".to_string(), SourceOutcome::Success),
                ("rd".to_string(), SourceOutcome::Failed),
            ]
        );
        assert_eq!(crawl_times(&pool).await.unwrap(), vec![7000]);
    }

    #[tokio::test]
    async fn duplicate_crawl_time_rejected_without_partial_rows() {
        let (_tmp, pool) = test_pool().await;

        record_run(&pool, 9000, &[("hn".to_string(), SourceOutcome::Success)], 10)
            .await
            .unwrap();

        let err = record_run(&pool, 9000, &[("rd".to_string(), SourceOutcome::Success)], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRun { crawl_time: 9000 }));

        let outcome_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_outcomes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(outcome_rows, 1);

        let runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM crawl_runs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(runs, 1);
    }
}
