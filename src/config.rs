use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Settings for the external fetch agent (the component that turns forum
/// pages into structured snapshots — it lives outside this process).
#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    /// Base URL of the fetch agent, e.g. `http://127.0.0.1:7410`.
    pub endpoint: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Whether syncs request per-post reaction detail by default. Reaction
    /// pages cost one extra request per post at the source.
    #[serde(default = "default_include_reactions")]
    pub include_reactions: bool,
}

fn default_fetch_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!("threadwatch/{}", env!("CARGO_PKG_VERSION"))
}
fn default_include_reactions() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Ceiling on concurrently running syncs across all threads, capping
    /// outbound request load on the source site.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Interval used when a watch request names neither an interval nor a
    /// cron expression.
    #[serde(default = "default_interval_minutes")]
    pub default_interval_minutes: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            default_interval_minutes: default_interval_minutes(),
        }
    }
}

fn default_interval_minutes() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.fetcher.endpoint.trim().is_empty() {
        anyhow::bail!("fetcher.endpoint must not be empty");
    }

    if config.fetcher.timeout_secs == 0 {
        anyhow::bail!("fetcher.timeout_secs must be > 0");
    }

    if config.sync.max_concurrent == 0 {
        anyhow::bail!("sync.max_concurrent must be >= 1");
    }

    if config.watch.default_interval_minutes == 0 {
        anyhow::bail!("watch.default_interval_minutes must be >= 1");
    }

    Ok(config)
}
