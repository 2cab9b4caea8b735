//! Shared helpers for the integration suites: a scripted in-process fetch
//! agent and builders for snapshots and engine wiring.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use threadwatch::config::{
    Config, DbConfig, FetcherConfig, ServerConfig, SyncConfig, WatchConfig,
};
use threadwatch::error::{Result, WatchError};
use threadwatch::fetch::{FetchOptions, Fetcher};
use threadwatch::models::{RawPost, RawThreadSnapshot, RawTimestamp};
use threadwatch::store::{MemoryStore, Store};
use threadwatch::sync::SyncEngine;

/// Fetch capability fed by the test instead of a network. Snapshots are
/// keyed by canonical URL; a URL without one fails with `FetchFailed`.
pub struct ScriptedFetcher {
    snapshots: Mutex<HashMap<String, RawThreadSnapshot>>,
    delay: Mutex<Duration>,
    pub calls: AtomicU64,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_snapshot(&self, url: &str, snapshot: RawThreadSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(url.to_string(), snapshot);
    }

    /// Remove the snapshot so subsequent fetches fail.
    pub fn fail_url(&self, url: &str) {
        self.snapshots.lock().unwrap().remove(url);
    }

    /// Make every fetch take at least `delay` (for overlap tests).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch_thread(&self, url: &str, _options: &FetchOptions) -> Result<RawThreadSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let snapshots = self.snapshots.lock().unwrap();
        snapshots
            .get(url)
            .cloned()
            .ok_or_else(|| WatchError::FetchFailed(format!("no scripted snapshot for {url}")))
    }
}

pub fn test_config() -> Config {
    Config {
        db: DbConfig {
            path: PathBuf::from("unused.sqlite"),
        },
        fetcher: FetcherConfig {
            endpoint: "http://127.0.0.1:0".to_string(),
            timeout_secs: 5,
            user_agent: "threadwatch-tests".to_string(),
            include_reactions: true,
        },
        sync: SyncConfig { max_concurrent: 4 },
        watch: WatchConfig {
            default_interval_minutes: 1,
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    }
}

/// Engine over a fresh in-memory store and the given scripted fetcher.
pub fn engine_with(fetcher: Arc<ScriptedFetcher>) -> (Arc<SyncEngine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let engine = Arc::new(SyncEngine::new(store_dyn, fetcher, &test_config()));
    (engine, store)
}

pub fn raw_post(post_id: i64, floor: i64, author: &str, text: &str, reactions: i64) -> RawPost {
    RawPost {
        post_id: Some(post_id),
        author_name: Some(author.to_string()),
        author_id: Some(post_id % 7),
        author_profile_url: Some(format!("https://forum.example.com/members/{author}")),
        posted_at: Some(RawTimestamp::Numeric(1_700_000_000 + floor * 300)),
        content_text: Some(text.to_string()),
        content_html: Some(format!("<div>{text}</div>")),
        image_urls: vec![],
        link_urls: vec![],
        embed_urls: vec![],
        floor: Some(floor),
        reactions: Some(reactions),
    }
}

pub fn snapshot(url: &str, title: &str, posts: Vec<RawPost>) -> RawThreadSnapshot {
    RawThreadSnapshot {
        url: Some(url.to_string()),
        title: Some(title.to_string()),
        categories: vec!["General".to_string()],
        tags: vec![],
        avatar_url: None,
        description: None,
        posts,
    }
}

/// Poll until `predicate` holds or `timeout` elapses; panics on timeout.
pub async fn wait_for<F>(what: &str, timeout: Duration, mut predicate: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
