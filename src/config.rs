use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: i64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: default_freshness_window(),
        }
    }
}

fn default_freshness_window() -> i64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// `once-per-period` gates sends to one per calendar day; `always`
    /// performs no gating.
    #[serde(default = "default_policy")]
    pub policy: String,
    /// How long an unacknowledged gate claim blocks other callers before a
    /// retry is granted again.
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_secs: i64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            claim_ttl_secs: default_claim_ttl(),
        }
    }
}

fn default_policy() -> String {
    "once-per-period".to_string()
}

fn default_claim_ttl() -> i64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    /// IANA timezone name used for period keys and digest dates.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A configured content source. Rows in the `sources` table are synced
/// from these on every ingest.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl SourceSpec {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl Config {
    pub fn tz(&self) -> Tz {
        // Validated at load time.
        self.report.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Calendar-day period key in the configured timezone (YYYY-MM-DD).
    pub fn period_key(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.tz()).format("%Y-%m-%d").to_string()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.crawl.freshness_window_secs < 0 {
        anyhow::bail!("crawl.freshness_window_secs must be >= 0");
    }

    if config.delivery.claim_ttl_secs < 1 {
        anyhow::bail!("delivery.claim_ttl_secs must be >= 1");
    }

    match config.delivery.policy.as_str() {
        "always" | "once-per-period" => {}
        other => anyhow::bail!(
            "Unknown delivery policy: '{}'. Must be always or once-per-period.",
            other
        ),
    }

    if config.report.timezone.parse::<Tz>().is_err() {
        anyhow::bail!("Unknown timezone: '{}'", config.report.timezone);
    }

    for source in &config.sources {
        if source.id.is_empty() {
            anyhow::bail!("sources entries must have a non-empty id");
        }
    }

    Ok(config)
}
