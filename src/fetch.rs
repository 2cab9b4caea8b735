//! The fetch capability: turning a thread URL into a raw snapshot.
//!
//! Scraping — HTML parsing, pagination walking, login/session handling —
//! deliberately lives outside this crate, behind the [`Fetcher`] trait.
//! The built-in [`HttpFetcher`] delegates to a fetch agent over HTTP: any
//! process that answers `GET /thread?url=...` with a
//! [`RawThreadSnapshot`](crate::models::RawThreadSnapshot) JSON body can
//! serve as the agent. Tests substitute their own implementations.
//!
//! # Agent protocol
//!
//! | Query parameter | Meaning |
//! |-----------------|---------|
//! | `url` | Thread URL to fetch (the agent walks all pages) |
//! | `reactions` | `true` to resolve per-post reaction counts (extra requests) |
//! | `since_post` | Only posts at or after this source post id (incremental) |
//!
//! `404` from the agent means the thread no longer exists at the source and
//! maps to [`WatchError::NotFound`]; transport errors and timeouts map to
//! [`WatchError::FetchFailed`].

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use crate::config::FetcherConfig;
use crate::error::{Result, WatchError};
use crate::models::RawThreadSnapshot;

/// Per-fetch options carried from sync options and config defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Resolve per-post reaction counts. Costs one extra request per post
    /// at the source, so schedulers may want this off for tight intervals.
    pub include_reactions: bool,
}

/// External capability that produces raw thread snapshots.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full thread (all pages) at `url`.
    async fn fetch_thread(&self, url: &str, options: &FetchOptions) -> Result<RawThreadSnapshot>;

    /// Fetch only posts at or after `since_post_id`. Implementations
    /// without an incremental path fall back to a full fetch.
    async fn fetch_from_post_onward(
        &self,
        url: &str,
        _since_post_id: i64,
        options: &FetchOptions,
    ) -> Result<RawThreadSnapshot> {
        self.fetch_thread(url, options).await
    }

    /// Whether [`fetch_from_post_onward`](Fetcher::fetch_from_post_onward)
    /// actually limits the fetch.
    fn supports_incremental(&self) -> bool {
        false
    }
}

/// HTTP client for a fetch agent endpoint.
pub struct HttpFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFetcher {
    /// Build a fetcher from config. The configured timeout bounds the whole
    /// request; exceeding it fails the run with `FetchFailed` instead of
    /// hanging a scheduler slot.
    pub fn new(config: &FetcherConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("building fetch agent HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn request(
        &self,
        url: &str,
        options: &FetchOptions,
        since_post_id: Option<i64>,
    ) -> Result<RawThreadSnapshot> {
        let mut query: Vec<(&str, String)> = vec![
            ("url", url.to_string()),
            ("reactions", options.include_reactions.to_string()),
        ];
        if let Some(since) = since_post_id {
            query.push(("since_post", since.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/thread", self.endpoint))
            .query(&query)
            .send()
            .await
            .map_err(|e| WatchError::FetchFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(WatchError::NotFound("thread".to_string(), url.to_string()));
        }
        if !response.status().is_success() {
            return Err(WatchError::FetchFailed(format!(
                "fetch agent returned {} for {}",
                response.status(),
                url
            )));
        }

        response
            .json::<RawThreadSnapshot>()
            .await
            .map_err(|e| WatchError::FetchFailed(format!("invalid snapshot payload: {e}")))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_thread(&self, url: &str, options: &FetchOptions) -> Result<RawThreadSnapshot> {
        self.request(url, options, None).await
    }

    async fn fetch_from_post_onward(
        &self,
        url: &str,
        since_post_id: i64,
        options: &FetchOptions,
    ) -> Result<RawThreadSnapshot> {
        self.request(url, options, Some(since_post_id)).await
    }

    fn supports_incremental(&self) -> bool {
        true
    }
}
