//! Sync orchestration.
//!
//! Drives one fetch → normalize → resolve → diff → persist cycle for a
//! single thread and returns a structured [`SyncResult`]. All failure modes
//! surface as typed [`WatchError`](crate::error::WatchError)s; nothing
//! escapes as an untyped fault.
//!
//! Concurrency contract:
//!
//! - At most one in-flight sync per thread identity. A second request for
//!   the same canonical URL is rejected with `SyncInProgress` instead of
//!   racing the first one's stored-post baseline.
//! - Syncs for different threads proceed independently, up to a bounded
//!   concurrency ceiling that caps outbound load on the source site.
//! - The fetch completes fully before any write transaction opens; no
//!   store transaction is held across the (slow) network step.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::diff::{diff_snapshot, Changeset};
use crate::error::{Result, WatchError};
use crate::fetch::{FetchOptions, Fetcher};
use crate::identity::resolve_identities;
use crate::models::{Post, RawThreadSnapshot, SyncResult};
use crate::normalize::{canonical_url, normalize_snapshot};
use crate::store::Store;

/// Options for one sync invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Override the configured default for reaction detail.
    pub include_reactions: Option<bool>,
    /// Compute the changeset without writing anything.
    pub dry_run: bool,
    /// Ask the fetch agent for posts after the newest stored source post id
    /// only. Falls back to a full fetch when unsupported or on first sync.
    pub incremental: bool,
}

/// Removes the canonical URL from the in-flight set when the sync ends,
/// however it ends.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

/// The sync orchestrator. One instance serves all threads; clones of the
/// inner `Arc`s are shared with the scheduler and the HTTP server.
pub struct SyncEngine {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn Fetcher>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    limiter: Arc<Semaphore>,
    fetch_timeout: Duration,
    default_include_reactions: bool,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, fetcher: Arc<dyn Fetcher>, config: &Config) -> Self {
        Self {
            store,
            fetcher,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            limiter: Arc::new(Semaphore::new(config.sync.max_concurrent)),
            fetch_timeout: Duration::from_secs(config.fetcher.timeout_secs),
            default_include_reactions: config.fetcher.include_reactions,
        }
    }

    /// First-time ingestion. Identical to [`sync`](SyncEngine::sync) except
    /// for intent: it is guaranteed to create the thread row when none
    /// exists yet.
    pub async fn crawl(&self, thread_url: &str, options: &SyncOptions) -> Result<SyncResult> {
        self.sync(thread_url, options).await
    }

    /// Run one sync cycle for `thread_url`.
    pub async fn sync(&self, thread_url: &str, options: &SyncOptions) -> Result<SyncResult> {
        let canonical = canonical_url(thread_url)?;

        let _guard = self.claim(&canonical)?;
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| WatchError::PersistenceFailed(format!("sync limiter closed: {e}")))?;

        let started = Instant::now();

        let existing = self.store.get_thread_by_url(&canonical).await?;
        let stored_posts = match &existing {
            Some(thread) => self.store.list_posts(&thread.uuid).await?,
            None => Vec::new(),
        };

        let raw = self
            .fetch(&canonical, options, existing.is_some(), &stored_posts)
            .await?;

        let mut normalized = normalize_snapshot(&raw)?;
        // The request URL is the identity key; a redirected or re-echoed
        // URL from the agent must not fork the thread.
        normalized.thread.url = canonical.clone();

        let resolved = resolve_identities(&normalized.posts, &stored_posts);
        let changeset = diff_snapshot(&resolved, &stored_posts);

        if options.dry_run {
            return Ok(build_result(
                existing.map(|t| t.uuid),
                &canonical,
                false,
                &changeset,
                normalized.posts.len(),
                true,
                started,
            ));
        }

        let (thread, created) = match existing {
            Some(thread) => (thread, false),
            None => (self.store.create_thread(&normalized.thread).await?, true),
        };

        let writes = plan_writes(&thread.uuid, &changeset, &stored_posts);
        if !writes.is_empty() {
            self.store.upsert_posts(&thread.uuid, &writes).await?;
        }
        self.store
            .update_thread_aggregates(&thread.uuid, &changeset.aggregates)
            .await?;

        let result = build_result(
            Some(thread.uuid),
            &canonical,
            created,
            &changeset,
            normalized.posts.len(),
            false,
            started,
        );

        info!(
            thread = %canonical,
            inserted = result.inserted,
            updated = result.updated,
            unchanged = result.unchanged,
            missing_in_fetch = result.missing_in_fetch,
            "sync complete"
        );

        Ok(result)
    }

    /// Register the canonical URL as in flight, or reject.
    fn claim(&self, canonical: &str) -> Result<InFlightGuard> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| WatchError::PersistenceFailed("in-flight set poisoned".to_string()))?;
        if !set.insert(canonical.to_string()) {
            return Err(WatchError::SyncInProgress(canonical.to_string()));
        }
        Ok(InFlightGuard {
            set: self.in_flight.clone(),
            key: canonical.to_string(),
        })
    }

    async fn fetch(
        &self,
        canonical: &str,
        options: &SyncOptions,
        thread_known: bool,
        stored_posts: &[Post],
    ) -> Result<RawThreadSnapshot> {
        let fetch_options = FetchOptions {
            include_reactions: options
                .include_reactions
                .unwrap_or(self.default_include_reactions),
        };

        let newest_source_id = stored_posts
            .iter()
            .filter_map(|p| p.content.source_post_id)
            .max();

        let fetch = async {
            match newest_source_id {
                Some(since)
                    if options.incremental && thread_known && self.fetcher.supports_incremental() =>
                {
                    self.fetcher
                        .fetch_from_post_onward(canonical, since, &fetch_options)
                        .await
                }
                _ => self.fetcher.fetch_thread(canonical, &fetch_options).await,
            }
        };

        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(WatchError::FetchFailed(format!(
                "fetch timed out after {}s for {canonical}",
                self.fetch_timeout.as_secs()
            ))),
        }
    }
}

/// Turn a changeset into post rows. Inserts mint fresh UUIDs; updates carry
/// the stored row's UUID (the store keys on identity and preserves it
/// regardless).
fn plan_writes(thread_uuid: &str, changeset: &Changeset, stored_posts: &[Post]) -> Vec<Post> {
    let uuid_by_identity: std::collections::HashMap<&str, &str> = stored_posts
        .iter()
        .map(|p| (p.identity.as_str(), p.uuid.as_str()))
        .collect();

    let mut writes = Vec::with_capacity(changeset.inserts.len() + changeset.updates.len());
    for insert in &changeset.inserts {
        writes.push(Post {
            uuid: Uuid::new_v4().to_string(),
            thread_uuid: thread_uuid.to_string(),
            identity: insert.identity.clone(),
            content: insert.content.clone(),
        });
    }
    for update in &changeset.updates {
        writes.push(Post {
            uuid: uuid_by_identity
                .get(update.identity.as_str())
                .map(|u| u.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            thread_uuid: thread_uuid.to_string(),
            identity: update.identity.clone(),
            content: update.after.clone(),
        });
    }
    writes
}

fn build_result(
    thread_uuid: Option<String>,
    thread_url: &str,
    created_thread: bool,
    changeset: &Changeset,
    total_fetched: usize,
    dry_run: bool,
    started: Instant,
) -> SyncResult {
    SyncResult {
        thread_uuid,
        thread_url: thread_url.to_string(),
        created_thread,
        inserted: changeset.inserts.len() as u64,
        updated: changeset.updates.len() as u64,
        unchanged: changeset.unchanged,
        missing_in_fetch: changeset.missing_in_fetch,
        total_fetched: total_fetched as u64,
        dry_run,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
