//! Core data models used throughout threadwatch.
//!
//! Three layers, ordered by distance from the source site:
//!
//! | Layer | Types | Produced by |
//! |-------|-------|-------------|
//! | Raw | [`RawThreadSnapshot`], [`RawPost`] | the external fetch agent |
//! | Canonical | [`ThreadMeta`], [`PostContent`], [`NormalizedSnapshot`] | the normalizer |
//! | Stored | [`Thread`], [`Post`] | the store |
//!
//! Raw types are deliberately loose (everything optional, timestamps
//! untyped); nothing unvalidated propagates past the normalizer.

use serde::{Deserialize, Serialize};

/// A timestamp as emitted by the source: unix seconds, unix milliseconds,
/// or a calendar date string. Disambiguated by the normalizer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Numeric(i64),
    Text(String),
}

/// One post as delivered by the fetch agent, before any validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPost {
    /// Source-assigned post id, when the forum exposes one.
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_id: Option<i64>,
    #[serde(default)]
    pub author_profile_url: Option<String>,
    #[serde(default)]
    pub posted_at: Option<RawTimestamp>,
    #[serde(default)]
    pub content_text: Option<String>,
    #[serde(default)]
    pub content_html: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub link_urls: Vec<String>,
    #[serde(default)]
    pub embed_urls: Vec<String>,
    /// 1-based display position within the thread.
    #[serde(default)]
    pub floor: Option<i64>,
    #[serde(default)]
    pub reactions: Option<i64>,
}

/// A full thread snapshot as delivered by the fetch agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThreadSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub posts: Vec<RawPost>,
}

/// Canonical thread metadata, before a UUID is assigned.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadMeta {
    /// Canonical URL: query, fragment, and pagination suffix stripped.
    pub url: String,
    pub title: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
}

/// Canonical post content, the unit the diff engine compares.
///
/// Carries no identity; identity resolution happens after normalization.
/// A missing author is stored as `None` — the "anonymous" sentinel is a
/// presentation concern, not a stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostContent {
    pub source_post_id: Option<i64>,
    pub floor: Option<i64>,
    pub author_name: Option<String>,
    pub author_id: Option<i64>,
    pub author_profile_url: Option<String>,
    /// Unix seconds, normalized from whatever the source emitted.
    pub posted_at: Option<i64>,
    pub content_text: String,
    pub content_html: Option<String>,
    pub image_urls: Vec<String>,
    pub link_urls: Vec<String>,
    pub embed_urls: Vec<String>,
    pub reactions: i64,
}

/// Output of the normalizer: canonical thread metadata plus ordered posts.
#[derive(Debug, Clone)]
pub struct NormalizedSnapshot {
    pub thread: ThreadMeta,
    pub posts: Vec<PostContent>,
}

/// Aggregates recomputed on every sync from the union of stored and fresh
/// posts, never accumulated incrementally.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThreadAggregates {
    pub post_count: i64,
    pub author_count: i64,
    pub first_post_at: Option<i64>,
    pub latest_post_at: Option<i64>,
}

/// A stored thread. The URL → UUID mapping is immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub uuid: String,
    pub url: String,
    pub title: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
    pub aggregates: ThreadAggregates,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored post. `identity` is the resolved stable key, unique within the
/// thread and never reassigned once written.
#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub uuid: String,
    pub thread_uuid: String,
    pub identity: String,
    pub content: PostContent,
}

/// Outcome of one sync cycle, returned by the orchestrator and recorded as
/// a watcher's last result.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    /// `None` only for a dry run against a thread that was never stored.
    pub thread_uuid: Option<String>,
    pub thread_url: String,
    /// True when this run created the thread row (first sync / crawl).
    pub created_thread: bool,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Stored posts absent from this fetch. Reported, never deleted.
    pub missing_in_fetch: u64,
    pub total_fetched: u64,
    pub dry_run: bool,
    pub duration_ms: u64,
}
