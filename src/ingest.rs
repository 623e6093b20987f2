//! Ingestion engine.
//!
//! Applies one crawl batch for one source: dedup by (source, url), title
//! drift tracking, rank history, and denormalized "current" field updates.
//! Each batch runs inside a single write transaction; a uniqueness race on
//! insert is recovered locally by falling back to the update path.

use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::config::SourceSpec;
use crate::db::WriteTx;
use crate::error::{is_unique_violation, StoreError};
use crate::models::{Disposition, ItemOutcome, ObservedItem};

/// Ingest one source's observed items at crawl time `crawl_time`, atomically.
///
/// Items are applied in the caller-supplied order. Returns one outcome per
/// observed item so the caller can aggregate run totals.
pub async fn ingest_source_batch(
    pool: &SqlitePool,
    crawl_time: i64,
    source: &SourceSpec,
    observed: &[ObservedItem],
) -> Result<Vec<ItemOutcome>, StoreError> {
    let mut tx = WriteTx::begin(pool).await?;

    let result = apply_batch(tx.conn(), crawl_time, source, observed).await;
    match result {
        Ok(outcomes) => {
            tx.commit().await?;
            Ok(outcomes)
        }
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

async fn apply_batch(
    conn: &mut SqliteConnection,
    crawl_time: i64,
    source: &SourceSpec,
    observed: &[ObservedItem],
) -> Result<Vec<ItemOutcome>, StoreError> {
    upsert_source(conn, source, crawl_time).await?;

    let mut outcomes = Vec::with_capacity(observed.len());
    for item in observed {
        let outcome = if item.url.is_empty() {
            // No stable identity without a url: always a fresh row.
            ItemOutcome {
                item_id: insert_item(conn, crawl_time, &source.id, item).await?,
                disposition: Disposition::Inserted,
            }
        } else {
            apply_keyed_item(conn, crawl_time, &source.id, item).await?
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// Sync the source row (id is immutable, display name is not).
async fn upsert_source(
    conn: &mut SqliteConnection,
    source: &SourceSpec,
    now: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sources (id, name, active, updated_at) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            active = excluded.active,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&source.id)
    .bind(source.display_name())
    .bind(source.active as i64)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn apply_keyed_item(
    conn: &mut SqliteConnection,
    crawl_time: i64,
    source_id: &str,
    item: &ObservedItem,
) -> Result<ItemOutcome, StoreError> {
    if let Some((existing_id, existing_title)) = find_item(conn, source_id, &item.url).await? {
        let disposition = update_item(conn, crawl_time, &existing_id, &existing_title, item).await?;
        return Ok(ItemOutcome {
            item_id: existing_id,
            disposition,
        });
    }

    // Insert-or-nothing, then fall back to the update path if another batch
    // won the race and the row is now visible.
    match try_insert_keyed(conn, crawl_time, source_id, item).await? {
        Some(item_id) => Ok(ItemOutcome {
            item_id,
            disposition: Disposition::Inserted,
        }),
        None => {
            let (existing_id, existing_title) = find_item(conn, source_id, &item.url)
                .await?
                .ok_or_else(|| StoreError::UnknownItem {
                    id: format!("{}:{}", source_id, item.url),
                })?;
            let disposition =
                update_item(conn, crawl_time, &existing_id, &existing_title, item).await?;
            Ok(ItemOutcome {
                item_id: existing_id,
                disposition,
            })
        }
    }
}

async fn find_item(
    conn: &mut SqliteConnection,
    source_id: &str,
    url: &str,
) -> Result<Option<(String, String)>, StoreError> {
    let row = sqlx::query("SELECT id, title FROM items WHERE source_id = ? AND url = ?")
        .bind(source_id)
        .bind(url)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| (r.get("id"), r.get("title"))))
}

/// Insert for a non-empty url. Returns None when the partial unique index
/// reports a conflict, meaning a concurrent batch inserted first.
async fn try_insert_keyed(
    conn: &mut SqliteConnection,
    crawl_time: i64,
    source_id: &str,
    item: &ObservedItem,
) -> Result<Option<String>, StoreError> {
    let id = Uuid::new_v4().to_string();
    let tags_json = serde_json::to_string(&item.tags).unwrap_or_else(|_| "[]".to_string());

    let result = sqlx::query(
        r#"
        INSERT INTO items
            (id, source_id, title, rank, url, alt_url, tags_json,
             first_seen, last_seen, seen_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT(source_id, url) WHERE url <> '' DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(source_id)
    .bind(&item.title)
    .bind(item.rank)
    .bind(&item.url)
    .bind(&item.alt_url)
    .bind(&tags_json)
    .bind(crawl_time)
    .bind(crawl_time)
    .bind(crawl_time)
    .bind(crawl_time)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => Ok(None),
        Ok(_) => {
            record_rank(conn, &id, item.rank, crawl_time).await?;
            Ok(Some(id))
        }
        // Fail closed on a uniqueness conflict reported as an error.
        Err(err) if is_unique_violation(&err) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Unconditional insert for items without a url.
async fn insert_item(
    conn: &mut SqliteConnection,
    crawl_time: i64,
    source_id: &str,
    item: &ObservedItem,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    let tags_json = serde_json::to_string(&item.tags).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        r#"
        INSERT INTO items
            (id, source_id, title, rank, url, alt_url, tags_json,
             first_seen, last_seen, seen_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, '', ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(source_id)
    .bind(&item.title)
    .bind(item.rank)
    .bind(&item.alt_url)
    .bind(&tags_json)
    .bind(crawl_time)
    .bind(crawl_time)
    .bind(crawl_time)
    .bind(crawl_time)
    .execute(&mut *conn)
    .await?;

    record_rank(conn, &id, item.rank, crawl_time).await?;
    Ok(id)
}

/// Repeat observation: append history, then overwrite the current fields.
async fn update_item(
    conn: &mut SqliteConnection,
    crawl_time: i64,
    item_id: &str,
    stored_title: &str,
    item: &ObservedItem,
) -> Result<Disposition, StoreError> {
    let title_changed = stored_title != item.title;
    if title_changed {
        sqlx::query(
            r#"
            INSERT INTO title_changes (id, item_id, old_title, new_title, changed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(item_id)
        .bind(stored_title)
        .bind(&item.title)
        .bind(crawl_time)
        .execute(&mut *conn)
        .await?;
    }

    record_rank(conn, item_id, item.rank, crawl_time).await?;

    let tags_json = serde_json::to_string(&item.tags).unwrap_or_else(|_| "[]".to_string());
    sqlx::query(
        r#"
        UPDATE items SET
            title = ?,
            rank = ?,
            alt_url = ?,
            tags_json = ?,
            last_seen = ?,
            seen_count = seen_count + 1,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&item.title)
    .bind(item.rank)
    .bind(&item.alt_url)
    .bind(&tags_json)
    .bind(crawl_time)
    .bind(crawl_time)
    .bind(item_id)
    .execute(&mut *conn)
    .await?;

    Ok(if title_changed {
        Disposition::UpdatedTitleChanged
    } else {
        Disposition::Updated
    })
}

async fn record_rank(
    conn: &mut SqliteConnection,
    item_id: &str,
    rank: i64,
    observed_at: i64,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO rank_samples (id, item_id, rank, observed_at) VALUES (?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(item_id)
        .bind(rank)
        .bind(observed_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
