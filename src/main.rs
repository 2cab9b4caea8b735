//! # threadwatch CLI (`tw`)
//!
//! The `tw` binary drives threadwatch: database initialization, one-shot
//! crawl/sync runs, thread browsing, and the API server with its watcher
//! scheduler.
//!
//! ## Usage
//!
//! ```bash
//! tw --config ./config/threadwatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tw init` | Create the SQLite database and run schema migrations |
//! | `tw crawl <url>` | First-time ingestion of a thread |
//! | `tw sync <url>` | One incremental sync cycle |
//! | `tw threads list` | List stored threads with aggregates |
//! | `tw threads show <uuid>` | Show a thread and its posts |
//! | `tw serve` | Start the HTTP API server (hosts the watchers) |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use threadwatch::config;
use threadwatch::db;
use threadwatch::fetch::HttpFetcher;
use threadwatch::server;
use threadwatch::store::{sqlite, SqliteStore, Store};
use threadwatch::sync::{SyncEngine, SyncOptions};

/// threadwatch — incremental forum thread synchronization on a schedule.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/threadwatch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tw",
    about = "threadwatch — incremental forum thread synchronization on a schedule",
    version,
    long_about = "threadwatch ingests forum thread content through an external fetch agent, \
    detects changes across repeated visits (new posts, edits, reaction deltas), and persists \
    a normalized record of threads and posts. Watchers re-sync threads on interval or cron \
    schedules via the API server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/threadwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the threads/posts tables.
    /// Idempotent — running it multiple times is safe.
    Init,

    /// First-time ingestion of a thread.
    ///
    /// Fetches the full thread through the fetch agent and stores it,
    /// creating the thread row. Running it on an already-stored thread
    /// behaves exactly like `sync`.
    Crawl {
        /// Thread URL (any page of the thread).
        url: String,

        /// Skip per-post reaction detail (cheaper at the source).
        #[arg(long)]
        no_reactions: bool,

        /// Compute the changeset without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// One incremental sync cycle for a thread.
    ///
    /// Fetches a fresh snapshot, diffs it against stored state, and applies
    /// inserts and updates. Posts missing from the fetch are reported,
    /// never deleted.
    Sync {
        /// Thread URL (any page of the thread).
        url: String,

        /// Skip per-post reaction detail (cheaper at the source).
        #[arg(long)]
        no_reactions: bool,

        /// Compute the changeset without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Ask the fetch agent for posts newer than the stored tail only.
        #[arg(long)]
        incremental: bool,
    },

    /// Browse stored threads.
    Threads {
        #[command(subcommand)]
        action: ThreadsAction,
    },

    /// Start the HTTP API server.
    ///
    /// Hosts the sync/crawl/watch endpoints and the watcher scheduler.
    /// Watchers live in this process; they are re-created on demand after
    /// a restart.
    Serve,
}

/// Thread browsing subcommands.
#[derive(Subcommand)]
enum ThreadsAction {
    /// List stored threads, most recently active first.
    List {
        /// Maximum number of threads to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Number of threads to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Show one thread's metadata and posts.
    Show {
        /// Thread UUID (as printed by `tw threads list`).
        uuid: String,

        /// Maximum number of posts to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Number of posts to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            sqlite::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Crawl {
            url,
            no_reactions,
            dry_run,
        } => {
            let options = SyncOptions {
                include_reactions: no_reactions.then_some(false),
                dry_run,
                incremental: false,
            };
            let engine = build_engine(&cfg).await?;
            let result = engine.crawl(&url, &options).await?;
            print_sync_result("crawl", &result);
        }
        Commands::Sync {
            url,
            no_reactions,
            dry_run,
            incremental,
        } => {
            let options = SyncOptions {
                include_reactions: no_reactions.then_some(false),
                dry_run,
                incremental,
            };
            let engine = build_engine(&cfg).await?;
            let result = engine.sync(&url, &options).await?;
            print_sync_result("sync", &result);
        }
        Commands::Threads { action } => match action {
            ThreadsAction::List { limit, offset } => {
                let store = build_store(&cfg).await?;
                let (threads, total) = store.list_threads(limit, offset).await?;
                println!(
                    "{:<38} {:>6} {:>8} {}",
                    "UUID", "POSTS", "AUTHORS", "TITLE"
                );
                for thread in &threads {
                    println!(
                        "{:<38} {:>6} {:>8} {}",
                        thread.uuid,
                        thread.aggregates.post_count,
                        thread.aggregates.author_count,
                        thread.title
                    );
                }
                println!("{} of {} thread(s)", threads.len(), total);
            }
            ThreadsAction::Show {
                uuid,
                limit,
                offset,
            } => {
                let store = build_store(&cfg).await?;
                let thread = store
                    .get_thread(&uuid)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("No thread with UUID {uuid}"))?;
                let (posts, total) = store.list_posts_page(&uuid, limit, offset).await?;

                println!("{}", thread.title);
                println!("  url: {}", thread.url);
                if !thread.categories.is_empty() {
                    println!("  categories: {}", thread.categories.join(", "));
                }
                if !thread.tags.is_empty() {
                    println!("  tags: {}", thread.tags.join(", "));
                }
                println!(
                    "  posts: {}  authors: {}",
                    thread.aggregates.post_count, thread.aggregates.author_count
                );
                println!();
                for post in &posts {
                    let floor = post
                        .content
                        .floor
                        .map(|f| format!("#{f}"))
                        .unwrap_or_else(|| "#?".to_string());
                    let author = post.content.author_name.as_deref().unwrap_or("anonymous");
                    println!("{floor} {author} (reactions: {})", post.content.reactions);
                    for line in post.content.content_text.lines().take(3) {
                        println!("    {line}");
                    }
                }
                println!("{} of {} post(s)", posts.len(), total);
            }
        },
        Commands::Serve => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "threadwatch=info".into()),
                )
                .init();
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn build_store(cfg: &config::Config) -> anyhow::Result<Arc<dyn Store>> {
    let pool = db::connect(cfg).await?;
    sqlite::run_migrations(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

async fn build_engine(cfg: &config::Config) -> anyhow::Result<SyncEngine> {
    let store = build_store(cfg).await?;
    let fetcher = Arc::new(HttpFetcher::new(&cfg.fetcher)?);
    Ok(SyncEngine::new(store, fetcher, cfg))
}

fn print_sync_result(command: &str, result: &threadwatch::models::SyncResult) {
    if result.dry_run {
        println!("{command} {} (dry-run)", result.thread_url);
    } else {
        println!("{command} {}", result.thread_url);
    }
    if let Some(uuid) = &result.thread_uuid {
        println!("  thread: {uuid}{}", if result.created_thread { " (created)" } else { "" });
    }
    println!("  fetched: {} post(s)", result.total_fetched);
    println!("  inserted: {}", result.inserted);
    println!("  updated: {}", result.updated);
    println!("  unchanged: {}", result.unchanged);
    if result.missing_in_fetch > 0 {
        println!("  missing in fetch: {}", result.missing_in_fetch);
    }
    println!("  took: {}ms", result.duration_ms);
    println!("ok");
}
