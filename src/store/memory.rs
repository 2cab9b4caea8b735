//! In-memory [`Store`] implementation for tests.
//!
//! `HashMap` and `Vec` behind `std::sync::RwLock`. Behavior mirrors the
//! SQLite backend: upserts keep the existing row UUID for a known
//! `(thread, identity)` pair, and post listing follows thread order.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Result, WatchError};
use crate::models::{Post, Thread, ThreadAggregates, ThreadMeta};

use super::Store;

struct StoredPost {
    post: Post,
    seq: u64,
}

/// In-memory store. Cheap to construct per test; not used in production.
#[derive(Default)]
pub struct MemoryStore {
    threads: RwLock<HashMap<String, Thread>>,
    posts: RwLock<Vec<StoredPost>>,
    next_seq: RwLock<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn thread_order_key(p: &StoredPost) -> (bool, i64, u64) {
        (p.post.content.floor.is_none(), p.post.content.floor.unwrap_or(0), p.seq)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_thread_by_url(&self, url: &str) -> Result<Option<Thread>> {
        let threads = self.threads.read().unwrap();
        Ok(threads.values().find(|t| t.url == url).cloned())
    }

    async fn get_thread(&self, uuid: &str) -> Result<Option<Thread>> {
        let threads = self.threads.read().unwrap();
        Ok(threads.get(uuid).cloned())
    }

    async fn create_thread(&self, meta: &ThreadMeta) -> Result<Thread> {
        let mut threads = self.threads.write().unwrap();
        if threads.values().any(|t| t.url == meta.url) {
            return Err(WatchError::PersistenceFailed(format!(
                "thread already exists for {}",
                meta.url
            )));
        }
        let ts = now();
        let thread = Thread {
            uuid: Uuid::new_v4().to_string(),
            url: meta.url.clone(),
            title: meta.title.clone(),
            categories: meta.categories.clone(),
            tags: meta.tags.clone(),
            avatar_url: meta.avatar_url.clone(),
            description: meta.description.clone(),
            aggregates: ThreadAggregates::default(),
            created_at: ts,
            updated_at: ts,
        };
        threads.insert(thread.uuid.clone(), thread.clone());
        Ok(thread)
    }

    async fn list_threads(&self, limit: i64, offset: i64) -> Result<(Vec<Thread>, i64)> {
        let threads = self.threads.read().unwrap();
        let mut all: Vec<Thread> = threads.values().cloned().collect();
        all.sort_by_key(|t| std::cmp::Reverse(t.aggregates.latest_post_at.unwrap_or(0)));
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_posts(&self, thread_uuid: &str) -> Result<Vec<Post>> {
        let posts = self.posts.read().unwrap();
        let mut matching: Vec<&StoredPost> = posts
            .iter()
            .filter(|p| p.post.thread_uuid == thread_uuid)
            .collect();
        matching.sort_by_key(|p| Self::thread_order_key(p));
        Ok(matching.into_iter().map(|p| p.post.clone()).collect())
    }

    async fn list_posts_page(
        &self,
        thread_uuid: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Post>, i64)> {
        let all = self.list_posts(thread_uuid).await?;
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn upsert_posts(&self, thread_uuid: &str, incoming: &[Post]) -> Result<()> {
        let mut posts = self.posts.write().unwrap();
        let mut next_seq = self.next_seq.write().unwrap();
        for post in incoming {
            let existing = posts
                .iter_mut()
                .find(|p| p.post.thread_uuid == thread_uuid && p.post.identity == post.identity);
            match existing {
                Some(stored) => {
                    // Keep the original row UUID; only content changes.
                    stored.post.content = post.content.clone();
                }
                None => {
                    *next_seq += 1;
                    posts.push(StoredPost {
                        post: Post {
                            thread_uuid: thread_uuid.to_string(),
                            ..post.clone()
                        },
                        seq: *next_seq,
                    });
                }
            }
        }
        Ok(())
    }

    async fn update_thread_aggregates(
        &self,
        uuid: &str,
        aggregates: &ThreadAggregates,
    ) -> Result<()> {
        let mut threads = self.threads.write().unwrap();
        let thread = threads
            .get_mut(uuid)
            .ok_or_else(|| WatchError::NotFound("thread".to_string(), uuid.to_string()))?;
        thread.aggregates = aggregates.clone();
        thread.updated_at = now();
        Ok(())
    }
}
