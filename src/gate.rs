//! Delivery gate.
//!
//! Decides whether a report may be sent for a delivery period. Two policies:
//! `always` (no gating, nothing recorded) and `once-per-period` (one
//! delivery per calendar day in the configured timezone).
//!
//! The gated flow is acquire → send → commit. `try_acquire` stakes a claim
//! atomically; a delivered period or a live claim is denied. A claim left
//! behind by a crash becomes stale after `claim_ttl_secs` and can be
//! re-claimed, so the gate is at-most-once on the happy path and
//! at-least-once across a crash between send and commit.

use sqlx::{Row, SqlitePool};

use crate::config::DeliveryConfig;
use crate::error::StoreError;
use crate::models::DeliveryStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Granted,
    Denied { reason: String },
}

pub async fn try_acquire(
    pool: &SqlitePool,
    delivery: &DeliveryConfig,
    period_key: &str,
    report_kind: &str,
    now: i64,
) -> Result<GateDecision, StoreError> {
    if delivery.policy == "always" {
        return Ok(GateDecision::Granted);
    }

    // Single-statement claim: insert wins, and an update wins only over an
    // undelivered claim old enough to be presumed dead.
    let result = sqlx::query(
        r#"
        INSERT INTO delivery_records (period_key, delivered, delivered_at, report_kind, claimed_at, created_at)
        VALUES (?, 0, NULL, ?, ?, ?)
        ON CONFLICT(period_key) DO UPDATE SET
            claimed_at = excluded.claimed_at,
            report_kind = excluded.report_kind
        WHERE delivery_records.delivered = 0
          AND excluded.claimed_at - delivery_records.claimed_at >= ?
        "#,
    )
    .bind(period_key)
    .bind(report_kind)
    .bind(now)
    .bind(now)
    .bind(delivery.claim_ttl_secs)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(GateDecision::Granted);
    }

    let delivered: Option<i64> =
        sqlx::query_scalar("SELECT delivered FROM delivery_records WHERE period_key = ?")
            .bind(period_key)
            .fetch_optional(pool)
            .await?;

    let reason = match delivered {
        Some(1) => format!("already delivered for period {period_key}"),
        _ => format!("delivery already in flight for period {period_key}"),
    };
    Ok(GateDecision::Denied { reason })
}

/// Mark the period delivered, exactly once. A second commit for the same
/// period surfaces `DuplicateCommit`. Under the `always` policy this is a
/// no-op since nothing was claimed.
pub async fn commit(
    pool: &SqlitePool,
    delivery: &DeliveryConfig,
    period_key: &str,
    report_kind: &str,
    sent_at: i64,
) -> Result<(), StoreError> {
    if delivery.policy == "always" {
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        INSERT INTO delivery_records (period_key, delivered, delivered_at, report_kind, claimed_at, created_at)
        VALUES (?, 1, ?, ?, ?, ?)
        ON CONFLICT(period_key) DO UPDATE SET
            delivered = 1,
            delivered_at = excluded.delivered_at,
            report_kind = excluded.report_kind
        WHERE delivery_records.delivered = 0
        "#,
    )
    .bind(period_key)
    .bind(sent_at)
    .bind(report_kind)
    .bind(sent_at)
    .bind(sent_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::DuplicateCommit {
            period_key: period_key.to_string(),
        });
    }
    Ok(())
}

pub async fn delivery_status(
    pool: &SqlitePool,
    period_key: &str,
) -> Result<Option<DeliveryStatus>, StoreError> {
    let row = sqlx::query(
        "SELECT period_key, delivered, delivered_at, report_kind FROM delivery_records WHERE period_key = ?",
    )
    .bind(period_key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| DeliveryStatus {
        period_key: r.get("period_key"),
        delivered: r.get::<i64, _>("delivered") != 0,
        delivered_at: r.get("delivered_at"),
        report_kind: r.get("report_kind"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_pool;

    fn gated() -> DeliveryConfig {
        DeliveryConfig {
            policy: "once-per-period".to_string(),
            claim_ttl_secs: 600,
        }
    }

    #[tokio::test]
    async fn one_delivery_per_period() {
        let (_tmp, pool) = test_pool().await;
        let delivery = gated();

        assert_eq!(
            try_acquire(&pool, &delivery, "2025-01-01", "daily", 1000).await.unwrap(),
            GateDecision::Granted
        );
        commit(&pool, &delivery, "2025-01-01", "daily", 1005).await.unwrap();

        let denied = try_acquire(&pool, &delivery, "2025-01-01", "daily", 2000)
            .await
            .unwrap();
        assert!(matches!(denied, GateDecision::Denied { .. }));

        // A new period is a fresh gate.
        assert_eq!(
            try_acquire(&pool, &delivery, "2025-01-02", "daily", 90000).await.unwrap(),
            GateDecision::Granted
        );

        let status = delivery_status(&pool, "2025-01-01").await.unwrap().unwrap();
        assert!(status.delivered);
        assert_eq!(status.delivered_at, Some(1005));
        assert_eq!(status.report_kind.as_deref(), Some("daily"));
    }

    #[tokio::test]
    async fn second_claim_before_commit_is_denied() {
        let (_tmp, pool) = test_pool().await;
        let delivery = gated();

        assert_eq!(
            try_acquire(&pool, &delivery, "2025-03-05", "daily", 1000).await.unwrap(),
            GateDecision::Granted
        );
        let second = try_acquire(&pool, &delivery, "2025-03-05", "daily", 1001)
            .await
            .unwrap();
        assert!(matches!(second, GateDecision::Denied { .. }));
    }

    #[tokio::test]
    async fn stale_claim_is_reclaimed_after_ttl() {
        let (_tmp, pool) = test_pool().await;
        let delivery = gated();

        assert_eq!(
            try_acquire(&pool, &delivery, "2025-03-05", "daily", 1000).await.unwrap(),
            GateDecision::Granted
        );
        // Crash here: no commit. Within the TTL the claim still holds.
        let early = try_acquire(&pool, &delivery, "2025-03-05", "daily", 1599)
            .await
            .unwrap();
        assert!(matches!(early, GateDecision::Denied { .. }));

        assert_eq!(
            try_acquire(&pool, &delivery, "2025-03-05", "daily", 1600).await.unwrap(),
            GateDecision::Granted
        );
        commit(&pool, &delivery, "2025-03-05", "daily", 1601).await.unwrap();
    }

    #[tokio::test]
    async fn double_commit_is_an_error() {
        let (_tmp, pool) = test_pool().await;
        let delivery = gated();

        try_acquire(&pool, &delivery, "2025-03-05", "daily", 1000).await.unwrap();
        commit(&pool, &delivery, "2025-03-05", "daily", 1001).await.unwrap();

        let err = commit(&pool, &delivery, "2025-03-05", "daily", 1002)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCommit { .. }));
    }

    #[tokio::test]
    async fn always_policy_never_gates() {
        let (_tmp, pool) = test_pool().await;
        let delivery = DeliveryConfig {
            policy: "always".to_string(),
            claim_ttl_secs: 600,
        };

        for now in [1000, 1001, 1002] {
            assert_eq!(
                try_acquire(&pool, &delivery, "2025-01-01", "daily", now).await.unwrap(),
                GateDecision::Granted
            );
            commit(&pool, &delivery, "2025-01-01", "daily", now).await.unwrap();
        }

        // Nothing recorded under always.
        assert!(delivery_status(&pool, "2025-01-01").await.unwrap().is_none());
    }
}
