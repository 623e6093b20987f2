//! Shared helpers for unit tests: a migrated tempfile-backed pool and
//! terse constructors for observed items and sources.

use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::config::{Config, SourceSpec};
use crate::{db, migrate};
use crate::models::ObservedItem;

pub async fn test_pool() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    (tmp, pool)
}

pub fn test_config(tmp: &TempDir) -> Config {
    let toml_str = format!(
        "[db]\npath = \"{}\"\n",
        tmp.path().join("trl.sqlite").display()
    );
    toml::from_str(&toml_str).unwrap()
}

pub fn source(id: &str) -> SourceSpec {
    SourceSpec {
        id: id.to_string(),
        name: String::new(),
        active: true,
    }
}

pub fn obs(title: &str, rank: i64, url: &str) -> ObservedItem {
    ObservedItem {
        title: title.to_string(),
        rank,
        url: url.to_string(),
        alt_url: String::new(),
        tags: Vec::new(),
    }
}
