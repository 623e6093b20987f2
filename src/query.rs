//! Read-only projections over the store.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::{RankSample, StoredItem, TitleChange};

fn item_from_row(row: &SqliteRow) -> StoredItem {
    StoredItem {
        id: row.get("id"),
        source_id: row.get("source_id"),
        title: row.get("title"),
        rank: row.get("rank"),
        url: row.get("url"),
        alt_url: row.get("alt_url"),
        tags: serde_json::from_str(&row.get::<String, _>("tags_json")).unwrap_or_default(),
        first_seen: row.get("first_seen"),
        last_seen: row.get("last_seen"),
        seen_count: row.get("seen_count"),
    }
}

const ITEM_COLUMNS: &str =
    "id, source_id, title, rank, url, alt_url, tags_json, first_seen, last_seen, seen_count";

/// Most recently observed items, best rank first within an observation
/// instant, optionally restricted to one source.
pub async fn latest_items(
    pool: &SqlitePool,
    source_id: Option<&str>,
    limit: i64,
) -> Result<Vec<StoredItem>, StoreError> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items
         WHERE (?1 IS NULL OR source_id = ?1)
         ORDER BY last_seen DESC, rank ASC
         LIMIT ?2"
    );
    let rows = sqlx::query(&sql)
        .bind(source_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(item_from_row).collect())
}

/// Items touched (inserted or re-observed) at or after `since`.
pub async fn items_changed_since(
    pool: &SqlitePool,
    since: i64,
) -> Result<Vec<StoredItem>, StoreError> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items
         WHERE updated_at >= ?
         ORDER BY updated_at DESC, rank ASC"
    );
    let rows = sqlx::query(&sql).bind(since).fetch_all(pool).await?;
    Ok(rows.iter().map(item_from_row).collect())
}

/// One item with its full rank and title history, oldest first.
pub async fn item_history(
    pool: &SqlitePool,
    item_id: &str,
) -> Result<(StoredItem, Vec<RankSample>, Vec<TitleChange>), StoreError> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(item_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::UnknownItem {
            id: item_id.to_string(),
        })?;
    let item = item_from_row(&row);

    let ranks = sqlx::query(
        "SELECT rank, observed_at FROM rank_samples WHERE item_id = ? ORDER BY observed_at, rowid",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|r| RankSample {
        rank: r.get("rank"),
        observed_at: r.get("observed_at"),
    })
    .collect();

    let titles = sqlx::query(
        "SELECT old_title, new_title, changed_at FROM title_changes
         WHERE item_id = ? ORDER BY changed_at, rowid",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|r| TitleChange {
        old_title: r.get("old_title"),
        new_title: r.get("new_title"),
        changed_at: r.get("changed_at"),
    })
    .collect();

    Ok((item, ranks, titles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_source_batch;
    use crate::testutil::{obs, source, test_pool};

    #[tokio::test]
    async fn latest_filters_by_source_and_orders_by_recency_then_rank() {
        let (_tmp, pool) = test_pool().await;

        ingest_source_batch(
            &pool,
            1000,
            &source("hn"),
            &[obs("B", 2, "https://a/2"), obs("A", 1, "https://a/1")],
        )
        .await
        .unwrap();
        ingest_source_batch(&pool, 2000, &source("rd"), &[obs("C", 1, "https://b/1")])
            .await
            .unwrap();

        let all = latest_items(&pool, None, 10).await.unwrap();
        let titles: Vec<&str> = all.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "A", "B"]);

        let hn_only = latest_items(&pool, Some("hn"), 10).await.unwrap();
        assert_eq!(hn_only.len(), 2);
        assert!(hn_only.iter().all(|i| i.source_id == "hn"));

        let capped = latest_items(&pool, None, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn changed_since_sees_reobservations() {
        let (_tmp, pool) = test_pool().await;
        let src = source("hn");

        ingest_source_batch(
            &pool,
            1000,
            &src,
            &[obs("A", 1, "https://a/1"), obs("B", 2, "https://a/2")],
        )
        .await
        .unwrap();
        ingest_source_batch(&pool, 2000, &src, &[obs("A", 5, "https://a/1")])
            .await
            .unwrap();

        let changed = items_changed_since(&pool, 2000).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].title, "A");
        assert_eq!(changed[0].rank, 5);
    }

    #[tokio::test]
    async fn history_returns_ordered_samples_and_title_drift() {
        let (_tmp, pool) = test_pool().await;
        let src = source("hn");

        let outcomes = ingest_source_batch(&pool, 1000, &src, &[obs("A", 3, "https://a/1")])
            .await
            .unwrap();
        ingest_source_batch(&pool, 2000, &src, &[obs("A2", 1, "https://a/1")])
            .await
            .unwrap();

        let (item, ranks, titles) = item_history(&pool, &outcomes[0].item_id).await.unwrap();
        assert_eq!(item.title, "A2");
        assert_eq!(item.seen_count, 2);
        assert_eq!(
            ranks.iter().map(|s| (s.rank, s.observed_at)).collect::<Vec<_>>(),
            vec![(3, 1000), (1, 2000)]
        );
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].old_title, "A");
        assert_eq!(titles[0].new_title, "A2");

        let err = item_history(&pool, "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownItem { .. }));
    }
}
