//! # threadwatch
//!
//! Forum thread monitoring: incremental synchronization of threads and
//! posts, driven per thread on interval or cron schedules.
//!
//! A fetch agent (external, behind the [`fetch::Fetcher`] trait) turns a
//! thread URL into a raw snapshot; threadwatch normalizes it, resolves a
//! stable identity for every post, diffs against stored state, and applies
//! the minimal changeset idempotently. Watchers repeat the cycle on a
//! schedule, each in its own isolated execution context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ Fetch agent │──▶│ normalize → identity →    │──▶│  SQLite   │
//! │ (external)  │   │ diff → persist (sync)     │   │ threads/  │
//! └─────────────┘   └────────────▲─────────────┘   │ posts     │
//!                                │                  └────┬─────┘
//!                        ┌───────┴───────┐               │
//!                        │   Watchers    │          ┌────┴─────┐
//!                        │ (scheduler)   │          │ CLI/HTTP │
//!                        └───────────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tw init                                  # create database
//! tw crawl https://forum.../threads/x.123  # first-time ingestion
//! tw sync  https://forum.../threads/x.123  # incremental sync
//! tw threads list                          # browse stored threads
//! tw serve                                 # HTTP API + watchers
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Raw, canonical, and stored data types |
//! | [`fetch`] | Fetch capability trait + HTTP fetch-agent client |
//! | [`normalize`] | Snapshot normalization |
//! | [`identity`] | Stable post identity resolution |
//! | [`diff`] | Changeset computation |
//! | [`store`] | Storage trait, SQLite and in-memory backends |
//! | [`sync`] | Sync orchestration |
//! | [`watch`] | Watcher registry |
//! | [`scheduler`] | Per-watcher execution loops |
//! | [`server`] | HTTP API |
//! | [`error`] | Typed failure taxonomy |

pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod models;
pub mod normalize;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod sync;
pub mod watch;
