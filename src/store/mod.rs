//! Storage abstraction for threads and posts.
//!
//! The [`Store`] trait defines every persistence operation the sync engine
//! and API need, enabling pluggable backends (SQLite in production, an
//! in-memory twin for tests). Implementations must be `Send + Sync`.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get_thread_by_url`](Store::get_thread_by_url) | Resolve a canonical URL to a stored thread |
//! | [`get_thread`](Store::get_thread) | Fetch a thread by UUID |
//! | [`create_thread`](Store::create_thread) | Mint a UUID and create the thread row |
//! | [`list_threads`](Store::list_threads) | Page threads by latest activity |
//! | [`list_posts`](Store::list_posts) | All posts of a thread in thread order |
//! | [`list_posts_page`](Store::list_posts_page) | Paged posts for the API |
//! | [`upsert_posts`](Store::upsert_posts) | Insert/update posts, all-or-nothing |
//! | [`update_thread_aggregates`](Store::update_thread_aggregates) | Write recomputed aggregates |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Post, Thread, ThreadAggregates, ThreadMeta};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend.
///
/// The URL → UUID mapping created by [`create_thread`](Store::create_thread)
/// is immutable; no operation reassigns a thread's UUID. Posts are keyed by
/// `(thread_uuid, identity)`; [`upsert_posts`](Store::upsert_posts) must
/// never change the row UUID of an existing identity.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a thread by its canonical URL.
    async fn get_thread_by_url(&self, url: &str) -> Result<Option<Thread>>;

    /// Look up a thread by UUID.
    async fn get_thread(&self, uuid: &str) -> Result<Option<Thread>>;

    /// Create a thread row for a canonical URL, minting its UUID.
    async fn create_thread(&self, meta: &ThreadMeta) -> Result<Thread>;

    /// Page over threads ordered by latest post activity (most recent
    /// first). Returns the page and the total thread count.
    async fn list_threads(&self, limit: i64, offset: i64) -> Result<(Vec<Thread>, i64)>;

    /// All posts of a thread in thread order (ascending floor, floorless
    /// posts last in insertion order). The identity resolver depends on
    /// this ordering.
    async fn list_posts(&self, thread_uuid: &str) -> Result<Vec<Post>>;

    /// Paged posts for the API. Returns the page and total post count.
    async fn list_posts_page(
        &self,
        thread_uuid: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Post>, i64)>;

    /// Insert or update posts, keyed by `(thread_uuid, identity)`, in one
    /// logical transaction — either every row lands or none does.
    async fn upsert_posts(&self, thread_uuid: &str, posts: &[Post]) -> Result<()>;

    /// Write recomputed aggregates and bump the thread's update timestamp.
    async fn update_thread_aggregates(
        &self,
        uuid: &str,
        aggregates: &ThreadAggregates,
    ) -> Result<()>;
}
