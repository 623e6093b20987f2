//! Whole-database statistics for the `stats` command.

use sqlx::SqlitePool;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub sources: i64,
    pub items: i64,
    pub rank_samples: i64,
    pub title_changes: i64,
    pub crawl_runs: i64,
    pub opinions: i64,
    pub opinion_links: i64,
    pub summaries: i64,
    pub digests: i64,
    pub deliveries: i64,
    pub last_crawl_time: Option<i64>,
}

async fn count(pool: &SqlitePool, table: &str) -> Result<i64, StoreError> {
    let n = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn collect(pool: &SqlitePool) -> Result<StoreStats, StoreError> {
    let last_crawl_time = sqlx::query_scalar("SELECT MAX(crawl_time) FROM crawl_runs")
        .fetch_one(pool)
        .await?;

    Ok(StoreStats {
        sources: count(pool, "sources").await?,
        items: count(pool, "items").await?,
        rank_samples: count(pool, "rank_samples").await?,
        title_changes: count(pool, "title_changes").await?,
        crawl_runs: count(pool, "crawl_runs").await?,
        opinions: count(pool, "opinions").await?,
        opinion_links: count(pool, "item_opinion_links").await?,
        summaries: count(pool, "sentiment_summaries").await?,
        digests: count(pool, "period_digests").await?,
        deliveries: count(pool, "delivery_records").await?,
        last_crawl_time,
    })
}
