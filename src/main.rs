//! # Trend Ledger CLI (`trl`)
//!
//! The `trl` binary is the primary interface for Trend Ledger. It provides
//! commands for database initialization, batch ingestion, history queries,
//! opinion management, digest generation, and gated delivery.
//!
//! ## Usage
//!
//! ```bash
//! trl --config ./config/trl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trl init` | Create the SQLite database and run schema migrations |
//! | `trl ingest <batch.json>` | Apply one crawl's observations from a batch file |
//! | `trl latest` | Show the most recently observed items |
//! | `trl changed --since <ts>` | Show items touched since a unix timestamp |
//! | `trl history <item-id>` | Show one item's rank and title history |
//! | `trl opinions <file.json>` | Import pre-scored opinions, optionally linking them |
//! | `trl summarize <item-id>` | Aggregate linked opinions into a sentiment summary |
//! | `trl digest` | Build and record a period digest |
//! | `trl notify` | Render the current digest to stdout, gated once per period |
//! | `trl delivery` | Show the delivery gate state for a period |
//! | `trl stats` | Show database statistics |

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use std::path::PathBuf;

use trendledger::config::{self, Config};
use trendledger::crawl::{self, CrawlOutcome};
use trendledger::digest::{self, DigestWindow};
use trendledger::fetch::{BatchFetcher, CrawlBatch};
use trendledger::gate::{self, GateDecision};
use trendledger::models::OpinionRecord;
use trendledger::{db, migrate, opinions, query, stats};

/// Trend Ledger CLI — an incremental ingestion, history, and delivery-gating
/// store for trending items.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/trl.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "trl",
    about = "Trend Ledger — incremental ingestion, history, and delivery gating for trending items",
    version,
    long_about = "Trend Ledger stores ranked items observed repeatedly from multiple content \
    sources, deduplicating by (source, url), tracking rank and title history, recording crawl \
    runs behind a freshness gate, and gating report delivery to once per period."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/trl.toml`. Database path, freshness window,
    /// delivery policy, timezone, and sources are read from this file.
    #[arg(long, global = true, default_value = "./config/trl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Apply one crawl's observations from a pre-fetched batch file.
    ///
    /// The batch file is JSON produced by an external fetcher: a crawl
    /// time plus per-source item lists. Repeat observations merge into
    /// existing items; new ones insert. The run is recorded in the crawl
    /// ledger, and skipped when a run already happened inside the
    /// freshness window unless `--force` is given.
    Ingest {
        /// Path to the JSON batch file.
        batch: PathBuf,

        /// Ignore the freshness window and run anyway.
        #[arg(long)]
        force: bool,

        /// Override the crawl time (unix seconds). Defaults to the batch
        /// file's crawl_time, then to the current time.
        #[arg(long)]
        at: Option<i64>,
    },

    /// Show the most recently observed items.
    Latest {
        /// Restrict to one source id.
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of items to show.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Show items inserted or re-observed since a unix timestamp.
    Changed {
        /// Unix timestamp (seconds).
        #[arg(long)]
        since: i64,
    },

    /// Show one item's current state plus its rank and title history.
    History {
        /// Item UUID.
        id: String,
    },

    /// Import pre-scored opinions from a JSON file.
    ///
    /// The file holds an array of opinion records with sentiment labels
    /// and scores supplied by an external scorer. With `--link`, every
    /// imported opinion is linked to the given item.
    Opinions {
        /// Path to the JSON opinions file.
        file: PathBuf,

        /// Link every imported opinion to this item id.
        #[arg(long)]
        link: Option<String>,
    },

    /// Aggregate the opinions linked to an item into a sentiment summary.
    ///
    /// Appends a snapshot (majority label, mean score, opinion count);
    /// earlier snapshots are kept.
    Summarize {
        /// Item UUID.
        id: String,

        /// Topic label for the summary.
        #[arg(long, default_value = "general")]
        topic: String,

        /// Override the generation time (unix seconds).
        #[arg(long)]
        at: Option<i64>,
    },

    /// Build and record a period digest from recently observed items.
    Digest {
        /// Digest window: `hourly` or `daily`.
        #[arg(long, default_value = "daily")]
        window: String,

        /// Override the window's end (unix seconds). Defaults to now.
        #[arg(long)]
        at: Option<i64>,
    },

    /// Render the current digest to stdout, gated by the delivery policy.
    ///
    /// Under `once-per-period`, at most one delivery succeeds per calendar
    /// day in the configured timezone; later attempts are skipped. Under
    /// `always`, every attempt delivers.
    Notify {
        /// Report kind / digest window: `hourly` or `daily`.
        #[arg(long, default_value = "daily")]
        kind: String,

        /// Override the delivery time (unix seconds). Defaults to now.
        #[arg(long)]
        at: Option<i64>,
    },

    /// Show the delivery gate state for a period.
    Delivery {
        /// Period key (YYYY-MM-DD). Defaults to today in the configured
        /// timezone.
        #[arg(long)]
        period: Option<String>,
    },

    /// Show database statistics.
    Stats,
}

fn effective_time(at: Option<i64>) -> i64 {
    at.unwrap_or_else(|| Utc::now().timestamp())
}

fn as_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest { batch, force, at } => {
            let pool = db::connect(&cfg).await?;
            run_ingest(&pool, &cfg, &batch, force, at).await?;
        }
        Commands::Latest { source, limit } => {
            let pool = db::connect(&cfg).await?;
            let items = query::latest_items(&pool, source.as_deref(), limit).await?;
            if items.is_empty() {
                println!("No items.");
            }
            for item in items {
                println!(
                    "{}  [{}] #{:<3} {} (seen {}x)",
                    item.id, item.source_id, item.rank, item.title, item.seen_count
                );
            }
        }
        Commands::Changed { since } => {
            let pool = db::connect(&cfg).await?;
            let items = query::items_changed_since(&pool, since).await?;
            println!("{} item(s) changed since {}", items.len(), since);
            for item in items {
                println!("{}  [{}] #{:<3} {}", item.id, item.source_id, item.rank, item.title);
            }
        }
        Commands::History { id } => {
            let pool = db::connect(&cfg).await?;
            let (item, ranks, titles) = query::item_history(&pool, &id).await?;
            println!("{} [{}] {}", item.id, item.source_id, item.title);
            println!(
                "first seen {}, last seen {}, seen {}x",
                item.first_seen, item.last_seen, item.seen_count
            );
            println!("Rank history:");
            for sample in ranks {
                println!("  {}  #{}", sample.observed_at, sample.rank);
            }
            if !titles.is_empty() {
                println!("Title changes:");
                for change in titles {
                    println!("  {}  '{}' -> '{}'", change.changed_at, change.old_title, change.new_title);
                }
            }
        }
        Commands::Opinions { file, link } => {
            let pool = db::connect(&cfg).await?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read opinions file: {}", file.display()))?;
            let records: Vec<OpinionRecord> =
                serde_json::from_str(&content).with_context(|| "Failed to parse opinions file")?;
            let now = Utc::now().timestamp();
            let ids = opinions::save_opinions(&pool, &records, now).await?;
            println!("Imported {} opinion(s).", ids.len());
            if let Some(item_id) = link {
                let mut linked = 0;
                for opinion_id in &ids {
                    if opinions::link_opinion(&pool, &item_id, opinion_id, "manual", 1.0).await? {
                        linked += 1;
                    }
                }
                println!("Linked {} opinion(s) to item {}.", linked, item_id);
            }
        }
        Commands::Summarize { id, topic, at } => {
            let pool = db::connect(&cfg).await?;
            let summary =
                opinions::summarize_item(&pool, &id, &topic, effective_time(at)).await?;
            println!("{}", summary.narrative);
        }
        Commands::Digest { window, at } => {
            let pool = db::connect(&cfg).await?;
            let window: DigestWindow = window.parse().map_err(anyhow::Error::msg)?;
            let until = effective_time(at);
            let since = until - window.span_secs();
            let date = cfg.period_key(as_utc(until));
            let draft = digest::build_digest(&pool, window, since, until).await?;
            let recorded = digest::record_digest(&pool, &date, window.label(), &draft, until).await?;
            println!(
                "Recorded {} digest for {} ({} items):",
                recorded.window_label, recorded.date, recorded.item_count
            );
            for highlight in &recorded.highlights {
                println!("  - {highlight}");
            }
            if !recorded.top_categories.is_empty() {
                println!("Top categories: {}", recorded.top_categories.join(", "));
            }
        }
        Commands::Notify { kind, at } => {
            let pool = db::connect(&cfg).await?;
            run_notify(&pool, &cfg, &kind, at).await?;
        }
        Commands::Delivery { period } => {
            let pool = db::connect(&cfg).await?;
            let key = period.unwrap_or_else(|| cfg.period_key(Utc::now()));
            match gate::delivery_status(&pool, &key).await? {
                Some(status) if status.delivered => println!(
                    "{}: delivered at {} ({})",
                    status.period_key,
                    status.delivered_at.unwrap_or_default(),
                    status.report_kind.as_deref().unwrap_or("unknown")
                ),
                Some(status) => println!("{}: claimed, not yet delivered", status.period_key),
                None => println!("{key}: no delivery recorded"),
            }
        }
        Commands::Stats => {
            let pool = db::connect(&cfg).await?;
            let s = stats::collect(&pool).await?;
            println!("Sources:          {}", s.sources);
            println!("Items:            {}", s.items);
            println!("Rank samples:     {}", s.rank_samples);
            println!("Title changes:    {}", s.title_changes);
            println!("Crawl runs:       {}", s.crawl_runs);
            println!("Opinions:         {}", s.opinions);
            println!("Opinion links:    {}", s.opinion_links);
            println!("Summaries:        {}", s.summaries);
            println!("Digests:          {}", s.digests);
            println!("Deliveries:       {}", s.deliveries);
            match s.last_crawl_time {
                Some(ts) => println!("Last crawl:       {ts}"),
                None => println!("Last crawl:       never"),
            }
        }
    }

    Ok(())
}

async fn run_ingest(
    pool: &SqlitePool,
    cfg: &Config,
    batch_path: &std::path::Path,
    force: bool,
    at: Option<i64>,
) -> Result<()> {
    let batch = CrawlBatch::from_path(batch_path)?;
    let crawl_time = at.or(batch.crawl_time).unwrap_or_else(|| Utc::now().timestamp());

    // Configured sources win when present (they carry active flags);
    // otherwise the batch file defines the source set.
    let sources = if cfg.sources.is_empty() {
        batch.source_specs()
    } else {
        cfg.sources.clone()
    };

    let fetcher = BatchFetcher::new(&batch);
    let outcome = crawl::run_crawl(
        pool,
        &sources,
        &fetcher,
        crawl_time,
        cfg.crawl.freshness_window_secs,
        force,
    )
    .await?;

    match outcome {
        CrawlOutcome::Completed { run, tally } => {
            println!(
                "Recorded run at {} ({} items: {} inserted, {} updated, {} title changes)",
                run.crawl_time, run.total_items, tally.inserted, tally.updated, tally.title_changes
            );
            if tally.sources_failed > 0 {
                println!(
                    "{} source(s) ok, {} failed",
                    tally.sources_ok, tally.sources_failed
                );
            }
        }
        CrawlOutcome::Skipped { last_run, age_secs } => {
            println!(
                "Skipped: last run at {} is only {}s old (window {}s). Use --force to run anyway.",
                last_run, age_secs, cfg.crawl.freshness_window_secs
            );
        }
    }
    Ok(())
}

async fn run_notify(pool: &SqlitePool, cfg: &Config, kind: &str, at: Option<i64>) -> Result<()> {
    let window: DigestWindow = kind.parse().map_err(anyhow::Error::msg)?;
    let now = effective_time(at);
    let period_key = cfg.period_key(as_utc(now));

    match gate::try_acquire(pool, &cfg.delivery, &period_key, window.label(), now).await? {
        GateDecision::Denied { reason } => {
            println!("Delivery skipped: {reason}");
            return Ok(());
        }
        GateDecision::Granted => {}
    }

    // Current digest for the period, built on demand when none exists yet.
    let report = match digest::digest_for(pool, &period_key, window.label()).await? {
        Some(existing) => existing,
        None => {
            let draft =
                digest::build_digest(pool, window, now - window.span_secs(), now).await?;
            digest::record_digest(pool, &period_key, window.label(), &draft, now).await?
        }
    };

    // Stdout is the transport.
    println!("== {} report for {} ==", report.window_label, report.date);
    if report.highlights.is_empty() {
        println!("(no items in window)");
    }
    for highlight in &report.highlights {
        println!("- {highlight}");
    }
    if !report.top_categories.is_empty() {
        println!("Categories: {}", report.top_categories.join(", "));
    }

    gate::commit(pool, &cfg.delivery, &period_key, window.label(), now).await?;
    println!("Delivered {} report for period {}.", window.label(), period_key);
    Ok(())
}
