//! # Trend Ledger
//!
//! A local-first store for trending items observed repeatedly across content
//! sources. Trend Ledger decides what an item *is* (identity and dedup),
//! what happened to it over time (rank and title history), whether a crawl
//! is worth running (freshness ledger), and whether a report may be sent
//! (delivery gate). Fetching, classification, sentiment scoring, and message
//! transport live outside, behind narrow interfaces.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │ Fetchers     │──▶│ Ingest engine │──▶│  SQLite   │
//! │ (external)   │   │ dedup+history │   │  (sqlx)   │
//! └──────────────┘   └───────────────┘   └────┬─────┘
//!                                             │
//!                        ┌────────────────────┤
//!                        ▼                    ▼
//!                  ┌───────────┐        ┌───────────┐
//!                  │ Queries / │        │ Delivery  │
//!                  │ digests   │        │ gate      │
//!                  └───────────┘        └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trl init                        # create database
//! trl ingest batch.json           # apply one crawl's observations
//! trl latest --source hn          # current items
//! trl digest --window daily       # build and record a digest
//! trl notify                      # gated delivery to stdout
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`ingest`] | Per-batch dedup/upsert/history protocol |
//! | [`crawl`] | Pipeline orchestration over a [`fetch::SourceFetcher`] |
//! | [`ledger`] | Crawl run records and the freshness gate |
//! | [`gate`] | Once-per-period delivery gate |
//! | [`opinions`] | Opinion links and sentiment summaries |
//! | [`digest`] | Period digest builder and records |
//! | [`query`] | Read-only projections |
//! | [`stats`] | Database statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod crawl;
pub mod db;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod ingest;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod opinions;
pub mod query;
pub mod stats;

#[cfg(test)]
mod testutil;
