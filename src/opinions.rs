//! Opinion persistence, item linking, and sentiment summaries.
//!
//! Opinions arrive pre-scored from an external collaborator and carry no
//! dedup key; re-submitting the same reaction creates another row. Links
//! are idempotent on (item, opinion). Summaries are append-only snapshots;
//! the current one is the most recently generated per (item, topic).

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::WriteTx;
use crate::error::StoreError;
use crate::models::{OpinionRecord, SentimentSummary};

pub async fn save_opinions(
    pool: &SqlitePool,
    records: &[OpinionRecord],
    now: i64,
) -> Result<Vec<String>, StoreError> {
    let mut tx = WriteTx::begin(pool).await?;
    let mut ids = Vec::with_capacity(records.len());

    for record in records {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO opinions
                (id, origin, text, author, upvotes, sentiment_label,
                 sentiment_score, url, published_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&record.origin)
        .bind(&record.text)
        .bind(&record.author)
        .bind(record.upvotes)
        .bind(&record.sentiment_label)
        .bind(record.sentiment_score)
        .bind(&record.url)
        .bind(record.published_at)
        .bind(now)
        .execute(tx.conn())
        .await;

        if let Err(err) = result {
            let _ = tx.rollback().await;
            return Err(err.into());
        }
        ids.push(id);
    }

    tx.commit().await?;
    Ok(ids)
}

/// Link an opinion to an item. Returns false when the link already existed.
pub async fn link_opinion(
    pool: &SqlitePool,
    item_id: &str,
    opinion_id: &str,
    match_type: &str,
    match_score: f64,
) -> Result<bool, StoreError> {
    ensure_item_exists(pool, item_id).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO item_opinion_links (item_id, opinion_id, match_type, match_score)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(item_id, opinion_id) DO NOTHING
        "#,
    )
    .bind(item_id)
    .bind(opinion_id)
    .bind(match_type)
    .bind(match_score)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Aggregate the opinions currently linked to an item into a new summary
/// snapshot: majority sentiment label, mean score, link count, and a short
/// narrative line.
pub async fn summarize_item(
    pool: &SqlitePool,
    item_id: &str,
    topic: &str,
    generated_at: i64,
) -> Result<SentimentSummary, StoreError> {
    ensure_item_exists(pool, item_id).await?;

    let rows = sqlx::query(
        r#"
        SELECT o.sentiment_label, o.sentiment_score
        FROM item_opinion_links l
        JOIN opinions o ON o.id = l.opinion_id
        WHERE l.item_id = ?
        "#,
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?;

    let opinion_count = rows.len() as i64;
    let (overall_sentiment, avg_score) = if rows.is_empty() {
        ("neutral".to_string(), 0.0)
    } else {
        let mut by_label: std::collections::BTreeMap<String, i64> = Default::default();
        let mut total = 0.0;
        for row in &rows {
            *by_label.entry(row.get("sentiment_label")).or_default() += 1;
            total += row.get::<f64, _>("sentiment_score");
        }
        // Majority label; ties break deterministically via the BTreeMap order.
        let majority = by_label
            .iter()
            .max_by_key(|(_, count)| *count)
            .map(|(label, _)| label.clone())
            .unwrap_or_else(|| "neutral".to_string());
        (majority, total / rows.len() as f64)
    };

    let narrative = if opinion_count == 0 {
        format!("No opinions linked yet for topic '{topic}'.")
    } else {
        format!(
            "{opinion_count} opinions on '{topic}': mostly {overall_sentiment} (avg score {avg_score:.2})."
        )
    };

    let summary = SentimentSummary {
        id: Uuid::new_v4().to_string(),
        item_id: item_id.to_string(),
        topic: topic.to_string(),
        overall_sentiment,
        avg_score,
        opinion_count,
        narrative,
        generated_at,
    };

    sqlx::query(
        r#"
        INSERT INTO sentiment_summaries
            (id, item_id, topic, overall_sentiment, avg_score, opinion_count,
             narrative, generated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&summary.id)
    .bind(&summary.item_id)
    .bind(&summary.topic)
    .bind(&summary.overall_sentiment)
    .bind(summary.avg_score)
    .bind(summary.opinion_count)
    .bind(&summary.narrative)
    .bind(summary.generated_at)
    .execute(pool)
    .await?;

    Ok(summary)
}

/// Most recent summary snapshot for (item, topic), if any.
pub async fn latest_summary(
    pool: &SqlitePool,
    item_id: &str,
    topic: &str,
) -> Result<Option<SentimentSummary>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, item_id, topic, overall_sentiment, avg_score, opinion_count,
               narrative, generated_at
        FROM sentiment_summaries
        WHERE item_id = ? AND topic = ?
        ORDER BY generated_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(item_id)
    .bind(topic)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| SentimentSummary {
        id: r.get("id"),
        item_id: r.get("item_id"),
        topic: r.get("topic"),
        overall_sentiment: r.get("overall_sentiment"),
        avg_score: r.get("avg_score"),
        opinion_count: r.get("opinion_count"),
        narrative: r.get("narrative"),
        generated_at: r.get("generated_at"),
    }))
}

async fn ensure_item_exists(pool: &SqlitePool, item_id: &str) -> Result<(), StoreError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(StoreError::UnknownItem {
            id: item_id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_source_batch;
    use crate::testutil::{obs, source, test_pool};

    fn opinion(label: &str, score: f64) -> OpinionRecord {
        OpinionRecord {
            origin: "forum".to_string(),
            text: format!("{label} take"),
            author: String::new(),
            upvotes: 0,
            sentiment_label: label.to_string(),
            sentiment_score: score,
            url: String::new(),
            published_at: 0,
        }
    }

    async fn seeded_item(pool: &SqlitePool) -> String {
        let outcomes =
            ingest_source_batch(pool, 1000, &source("hn"), &[obs("Topic", 1, "https://a/1")])
                .await
                .unwrap();
        outcomes[0].item_id.clone()
    }

    #[tokio::test]
    async fn links_are_idempotent() {
        let (_tmp, pool) = test_pool().await;
        let item_id = seeded_item(&pool).await;
        let ids = save_opinions(&pool, &[opinion("positive", 0.8)], 1000)
            .await
            .unwrap();

        assert!(link_opinion(&pool, &item_id, &ids[0], "keyword", 0.9).await.unwrap());
        assert!(!link_opinion(&pool, &item_id, &ids[0], "keyword", 0.9).await.unwrap());

        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_opinion_links")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(links, 1);
    }

    #[tokio::test]
    async fn linking_unknown_item_fails() {
        let (_tmp, pool) = test_pool().await;
        let ids = save_opinions(&pool, &[opinion("neutral", 0.0)], 1000)
            .await
            .unwrap();

        let err = link_opinion(&pool, "missing", &ids[0], "manual", 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownItem { .. }));
    }

    #[tokio::test]
    async fn summary_reflects_majority_and_mean() {
        let (_tmp, pool) = test_pool().await;
        let item_id = seeded_item(&pool).await;

        let ids = save_opinions(
            &pool,
            &[
                opinion("positive", 0.9),
                opinion("positive", 0.7),
                opinion("negative", -0.5),
            ],
            1000,
        )
        .await
        .unwrap();
        for id in &ids {
            link_opinion(&pool, &item_id, id, "keyword", 1.0).await.unwrap();
        }

        let summary = summarize_item(&pool, &item_id, "launch", 2000).await.unwrap();
        assert_eq!(summary.overall_sentiment, "positive");
        assert_eq!(summary.opinion_count, 3);
        assert!((summary.avg_score - (0.9 + 0.7 - 0.5) / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn summaries_append_and_latest_wins() {
        let (_tmp, pool) = test_pool().await;
        let item_id = seeded_item(&pool).await;

        summarize_item(&pool, &item_id, "launch", 2000).await.unwrap();

        let ids = save_opinions(&pool, &[opinion("negative", -0.4)], 2500)
            .await
            .unwrap();
        link_opinion(&pool, &item_id, &ids[0], "manual", 1.0).await.unwrap();

        summarize_item(&pool, &item_id, "launch", 3000).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sentiment_summaries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let latest = latest_summary(&pool, &item_id, "launch")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.generated_at, 3000);
        assert_eq!(latest.opinion_count, 1);
        assert_eq!(latest.overall_sentiment, "negative");
    }
}
