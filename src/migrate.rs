use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Sources are long-lived; names are mutable, ids are not.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Items carry denormalized "current" fields; history lives in
    // rank_samples and title_changes.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            rank INTEGER NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            alt_url TEXT NOT NULL DEFAULT '',
            tags_json TEXT NOT NULL DEFAULT '[]',
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            seen_count INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Dedup key: (source, url) is unique only when a url exists. Empty-url
    // items carry no identity and always insert.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_source_url ON items(source_id, url) WHERE url <> ''",
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS title_changes (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            old_title TEXT NOT NULL,
            new_title TEXT NOT NULL,
            changed_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES items(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rank_samples (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            rank INTEGER NOT NULL,
            observed_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES items(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_runs (
            id TEXT PRIMARY KEY,
            crawl_time INTEGER NOT NULL UNIQUE,
            total_items INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_outcomes (
            run_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            outcome TEXT NOT NULL CHECK (outcome IN ('success', 'failed')),
            PRIMARY KEY (run_id, source_id),
            FOREIGN KEY (run_id) REFERENCES crawl_runs(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_records (
            period_key TEXT PRIMARY KEY,
            delivered INTEGER NOT NULL DEFAULT 0,
            delivered_at INTEGER,
            report_kind TEXT,
            claimed_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS opinions (
            id TEXT PRIMARY KEY,
            origin TEXT NOT NULL,
            text TEXT NOT NULL,
            author TEXT NOT NULL DEFAULT '',
            upvotes INTEGER NOT NULL DEFAULT 0,
            sentiment_label TEXT NOT NULL,
            sentiment_score REAL NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            published_at INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_opinion_links (
            item_id TEXT NOT NULL,
            opinion_id TEXT NOT NULL,
            match_type TEXT NOT NULL,
            match_score REAL NOT NULL,
            PRIMARY KEY (item_id, opinion_id),
            FOREIGN KEY (item_id) REFERENCES items(id),
            FOREIGN KEY (opinion_id) REFERENCES opinions(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sentiment_summaries (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            overall_sentiment TEXT NOT NULL,
            avg_score REAL NOT NULL,
            opinion_count INTEGER NOT NULL,
            narrative TEXT NOT NULL DEFAULT '',
            generated_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES items(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS period_digests (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            window_label TEXT NOT NULL,
            highlights_json TEXT NOT NULL DEFAULT '[]',
            top_categories_json TEXT NOT NULL DEFAULT '[]',
            item_count INTEGER NOT NULL DEFAULT 0,
            generated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_source ON items(source_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_last_seen ON items(last_seen DESC)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rank_samples_item ON rank_samples(item_id, observed_at)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_title_changes_item ON title_changes(item_id, changed_at)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_summaries_item_topic ON sentiment_summaries(item_id, topic, generated_at)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_digests_date_window ON period_digests(date, window_label, generated_at)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
