//! Period digests.
//!
//! A digest is a rendered highlight set for one (date, window) pair. The
//! builder selects highlights from recently observed items; recording is
//! append-only, so regenerating a digest never rewrites history and the
//! current digest is simply the newest row.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::PeriodDigest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestWindow {
    Hourly,
    Daily,
}

impl DigestWindow {
    pub fn label(&self) -> &'static str {
        match self {
            DigestWindow::Hourly => "hourly",
            DigestWindow::Daily => "daily",
        }
    }

    pub fn span_secs(&self) -> i64 {
        match self {
            DigestWindow::Hourly => 3600,
            DigestWindow::Daily => 86400,
        }
    }

    /// (max highlights, max categories) for this window.
    fn limits(&self) -> (usize, usize) {
        match self {
            DigestWindow::Hourly => (5, 3),
            DigestWindow::Daily => (10, 5),
        }
    }
}

impl std::str::FromStr for DigestWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(DigestWindow::Hourly),
            "daily" => Ok(DigestWindow::Daily),
            other => Err(format!("unknown window '{other}', expected hourly or daily")),
        }
    }
}

/// Digest content before it is recorded.
#[derive(Debug, Clone)]
pub struct DigestDraft {
    pub highlights: Vec<String>,
    pub top_categories: Vec<String>,
    pub item_count: i64,
}

/// Build a digest draft from items observed in `(since, until]`.
///
/// Highlights are current titles in rank order, deduplicated on a
/// normalized 30-character prefix so retitled near-duplicates collapse.
/// Categories are the most frequent tags.
pub async fn build_digest(
    pool: &SqlitePool,
    window: DigestWindow,
    since: i64,
    until: i64,
) -> Result<DigestDraft, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT title, tags_json
        FROM items
        WHERE last_seen > ? AND last_seen <= ?
        ORDER BY rank ASC, last_seen DESC
        "#,
    )
    .bind(since)
    .bind(until)
    .fetch_all(pool)
    .await?;

    let item_count = rows.len() as i64;
    let (max_highlights, max_categories) = window.limits();

    let mut highlights = Vec::new();
    let mut seen_keys = std::collections::HashSet::new();
    let mut tag_counts: std::collections::BTreeMap<String, i64> = Default::default();

    for row in &rows {
        let title: String = row.get("title");
        if highlights.len() < max_highlights && seen_keys.insert(title_key(&title)) {
            highlights.push(title);
        }
        let tags: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("tags_json")).unwrap_or_default();
        for tag in tags {
            *tag_counts.entry(tag).or_default() += 1;
        }
    }

    let mut ranked_tags: Vec<(String, i64)> = tag_counts.into_iter().collect();
    // Frequency first; the BTreeMap already ordered ties alphabetically.
    ranked_tags.sort_by(|a, b| b.1.cmp(&a.1));
    let top_categories = ranked_tags
        .into_iter()
        .take(max_categories)
        .map(|(tag, _)| tag)
        .collect();

    Ok(DigestDraft {
        highlights,
        top_categories,
        item_count,
    })
}

fn title_key(title: &str) -> String {
    title.trim().to_lowercase().chars().take(30).collect()
}

/// Append a digest row for (date, window).
pub async fn record_digest(
    pool: &SqlitePool,
    date: &str,
    window_label: &str,
    draft: &DigestDraft,
    generated_at: i64,
) -> Result<PeriodDigest, StoreError> {
    let digest = PeriodDigest {
        id: Uuid::new_v4().to_string(),
        date: date.to_string(),
        window_label: window_label.to_string(),
        highlights: draft.highlights.clone(),
        top_categories: draft.top_categories.clone(),
        item_count: draft.item_count,
        generated_at,
    };

    sqlx::query(
        r#"
        INSERT INTO period_digests
            (id, date, window_label, highlights_json, top_categories_json,
             item_count, generated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&digest.id)
    .bind(&digest.date)
    .bind(&digest.window_label)
    .bind(serde_json::to_string(&digest.highlights).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&digest.top_categories).unwrap_or_else(|_| "[]".to_string()))
    .bind(digest.item_count)
    .bind(digest.generated_at)
    .execute(pool)
    .await?;

    Ok(digest)
}

/// Current digest for (date, window): the most recently generated row.
pub async fn digest_for(
    pool: &SqlitePool,
    date: &str,
    window_label: &str,
) -> Result<Option<PeriodDigest>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, date, window_label, highlights_json, top_categories_json,
               item_count, generated_at
        FROM period_digests
        WHERE date = ? AND window_label = ?
        ORDER BY generated_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(date)
    .bind(window_label)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| PeriodDigest {
        id: r.get("id"),
        date: r.get("date"),
        window_label: r.get("window_label"),
        highlights: serde_json::from_str(&r.get::<String, _>("highlights_json"))
            .unwrap_or_default(),
        top_categories: serde_json::from_str(&r.get::<String, _>("top_categories_json"))
            .unwrap_or_default(),
        item_count: r.get("item_count"),
        generated_at: r.get("generated_at"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_source_batch;
    use crate::models::ObservedItem;
    use crate::testutil::{obs, source, test_pool};

    fn tagged(title: &str, rank: i64, url: &str, tags: &[&str]) -> ObservedItem {
        let mut item = obs(title, rank, url);
        item.tags = tags.iter().map(|t| t.to_string()).collect();
        item
    }

    #[tokio::test]
    async fn highlights_keep_rank_order_and_collapse_near_duplicates() {
        let (_tmp, pool) = test_pool().await;
        let src = source("hn");

        ingest_source_batch(
            &pool,
            1000,
            &src,
            &[
                tagged("Big Model Release Announced Today Worldwide", 1, "https://a/1", &["ai"]),
                tagged("  big model release announced today WORLDWIDE extra", 2, "https://a/2", &["ai"]),
                tagged("Markets slide on rate fears", 3, "https://a/3", &["finance"]),
                tagged("New kernel version ships", 4, "https://a/4", &["linux", "ai"]),
            ],
        )
        .await
        .unwrap();

        let draft = build_digest(&pool, DigestWindow::Hourly, 0, 1000).await.unwrap();
        // Two titles share a 30-char normalized prefix; only the best-ranked
        // survives, and order follows rank.
        assert_eq!(
            draft.highlights,
            vec![
                "Big Model Release Announced Today Worldwide".to_string(),
                "Markets slide on rate fears".to_string(),
                "New kernel version ships".to_string(),
            ]
        );
        assert_eq!(draft.top_categories, vec!["ai".to_string(), "finance".to_string(), "linux".to_string()]);
        assert_eq!(draft.item_count, 4);
    }

    #[tokio::test]
    async fn hourly_window_caps_at_five_highlights() {
        let (_tmp, pool) = test_pool().await;
        let src = source("hn");

        let items: Vec<ObservedItem> = (1..=8)
            .map(|i| obs(&format!("Story number {i}"), i, &format!("https://a/{i}")))
            .collect();
        ingest_source_batch(&pool, 1000, &src, &items).await.unwrap();

        let draft = build_digest(&pool, DigestWindow::Hourly, 0, 1000).await.unwrap();
        assert_eq!(draft.highlights.len(), 5);
        assert_eq!(draft.item_count, 8);
        assert_eq!(draft.highlights[0], "Story number 1");
    }

    #[tokio::test]
    async fn digests_append_and_latest_wins() {
        let (_tmp, pool) = test_pool().await;

        let first = DigestDraft {
            highlights: vec!["old".to_string()],
            top_categories: vec![],
            item_count: 1,
        };
        let second = DigestDraft {
            highlights: vec!["new".to_string()],
            top_categories: vec!["ai".to_string()],
            item_count: 2,
        };

        record_digest(&pool, "2025-01-01", "daily", &first, 1000).await.unwrap();
        record_digest(&pool, "2025-01-01", "daily", &second, 2000).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM period_digests")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 2);

        let current = digest_for(&pool, "2025-01-01", "daily").await.unwrap().unwrap();
        assert_eq!(current.highlights, vec!["new".to_string()]);
        assert_eq!(current.item_count, 2);

        assert!(digest_for(&pool, "2025-01-02", "daily").await.unwrap().is_none());
    }
}
