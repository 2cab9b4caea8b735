//! Watcher registry: the set of active per-thread monitors.
//!
//! A watcher pairs one thread target with a schedule and owns the runtime
//! telemetry of its periodic syncs (status, counters, last result, next
//! run). The registry enforces at most one active watcher per canonical
//! thread URL — creating a second is rejected with `DuplicateWatcher`; stop
//! the existing one first. Schedules and targets are immutable after
//! creation; only status and timing fields mutate.
//!
//! Stopping a watcher cancels future scheduled runs and marks it
//! `stopped`. An in-flight run is never aborted; it completes and records
//! its outcome.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Result, WatchError};
use crate::models::SyncResult;
use crate::normalize::canonical_url;
use crate::scheduler;
use crate::sync::{SyncEngine, SyncOptions};

/// When a watcher's sync job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Every `minutes` minutes, anchored at the last run start. Missed
    /// ticks are skipped, not bursted.
    Interval { minutes: u64 },
    /// A five- or six-field cron expression, evaluated in UTC.
    Calendar { expression: String },
}

impl Schedule {
    /// Validate at creation time; a watcher never carries an unusable
    /// schedule into its run loop.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Interval { minutes } => {
                if *minutes == 0 {
                    return Err(WatchError::InvalidSchedule(
                        "interval must be at least one minute".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Calendar { expression } => {
                scheduler::parse_calendar(expression)?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval { minutes } => write!(f, "every {minutes} minutes"),
            Self::Calendar { expression } => write!(f, "cron {expression} (UTC)"),
        }
    }
}

/// Watcher lifecycle state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherStatus {
    Scheduled,
    Running,
    Errored,
    Stopped,
}

/// Outcome of the most recent run, kept on the watcher so a failed
/// scheduled run is visible without digging through logs.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Unix seconds of the run start.
    pub at: i64,
    pub success: bool,
    pub result: Option<SyncResult>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct WatcherRuntime {
    status: WatcherStatus,
    next_run_at: Option<i64>,
    last_run: Option<RunOutcome>,
    sync_count: u64,
    error_count: u64,
}

/// Shared state of one watcher; the registry and the watcher's scheduler
/// task both hold an `Arc` of it.
#[derive(Debug)]
pub struct WatcherState {
    pub id: String,
    pub thread_url: String,
    pub schedule: Schedule,
    pub options: SyncOptions,
    pub created_at: i64,
    runtime: RwLock<WatcherRuntime>,
}

impl WatcherState {
    fn new(id: String, thread_url: String, schedule: Schedule, options: SyncOptions) -> Self {
        Self {
            id,
            thread_url,
            schedule,
            options,
            created_at: chrono::Utc::now().timestamp(),
            runtime: RwLock::new(WatcherRuntime {
                status: WatcherStatus::Scheduled,
                next_run_at: None,
                last_run: None,
                sync_count: 0,
                error_count: 0,
            }),
        }
    }

    pub fn status(&self) -> WatcherStatus {
        self.runtime.read().unwrap().status
    }

    pub fn next_run_at(&self) -> Option<i64> {
        self.runtime.read().unwrap().next_run_at
    }

    pub(crate) fn set_next_run(&self, at: Option<i64>) {
        let mut runtime = self.runtime.write().unwrap();
        if runtime.status != WatcherStatus::Stopped {
            runtime.next_run_at = at;
        }
    }

    pub(crate) fn set_running(&self) {
        let mut runtime = self.runtime.write().unwrap();
        if runtime.status != WatcherStatus::Stopped {
            runtime.status = WatcherStatus::Running;
        }
    }

    pub(crate) fn record_success(&self, at: i64, result: SyncResult) {
        let mut runtime = self.runtime.write().unwrap();
        runtime.sync_count += 1;
        runtime.last_run = Some(RunOutcome {
            at,
            success: true,
            result: Some(result),
            error: None,
        });
        if runtime.status != WatcherStatus::Stopped {
            runtime.status = WatcherStatus::Scheduled;
        }
    }

    pub(crate) fn record_failure(&self, at: i64, code: &str, message: String) {
        let mut runtime = self.runtime.write().unwrap();
        let benign = code == "sync_in_progress";
        if !benign {
            runtime.error_count += 1;
        }
        runtime.last_run = Some(RunOutcome {
            at,
            success: false,
            result: None,
            error: Some(format!("{code}: {message}")),
        });
        if runtime.status != WatcherStatus::Stopped && !benign {
            runtime.status = WatcherStatus::Errored;
        } else if runtime.status == WatcherStatus::Running {
            runtime.status = WatcherStatus::Scheduled;
        }
    }

    pub(crate) fn mark_stopped(&self) {
        let mut runtime = self.runtime.write().unwrap();
        runtime.status = WatcherStatus::Stopped;
        runtime.next_run_at = None;
    }

    pub fn view(&self) -> WatcherView {
        let runtime = self.runtime.read().unwrap();
        WatcherView {
            id: self.id.clone(),
            thread_url: self.thread_url.clone(),
            schedule: self.schedule.clone(),
            status: runtime.status,
            created_at: self.created_at,
            next_run_at: runtime.next_run_at,
            sync_count: runtime.sync_count,
            error_count: runtime.error_count,
            last_run: runtime.last_run.clone(),
        }
    }
}

/// Read-only snapshot of a watcher, as served by the API.
#[derive(Debug, Clone, Serialize)]
pub struct WatcherView {
    pub id: String,
    pub thread_url: String,
    pub schedule: Schedule,
    pub status: WatcherStatus,
    pub created_at: i64,
    pub next_run_at: Option<i64>,
    pub sync_count: u64,
    pub error_count: u64,
    pub last_run: Option<RunOutcome>,
}

struct WatcherEntry {
    state: Arc<WatcherState>,
    cancel: watch::Sender<bool>,
}

/// Owns all watchers and their scheduler tasks.
pub struct WatcherRegistry {
    engine: Arc<SyncEngine>,
    watchers: RwLock<HashMap<String, WatcherEntry>>,
    default_interval_minutes: u64,
}

impl WatcherRegistry {
    pub fn new(engine: Arc<SyncEngine>, default_interval_minutes: u64) -> Self {
        Self {
            engine,
            watchers: RwLock::new(HashMap::new()),
            default_interval_minutes,
        }
    }

    /// Create a watcher and start its schedule. The first sync runs
    /// immediately; subsequent runs follow the schedule.
    pub fn create(
        &self,
        thread_url: &str,
        schedule: Option<Schedule>,
        options: SyncOptions,
    ) -> Result<WatcherView> {
        let canonical = canonical_url(thread_url)?;
        let schedule = schedule.unwrap_or(Schedule::Interval {
            minutes: self.default_interval_minutes,
        });
        schedule.validate()?;

        let mut watchers = self.watchers.write().unwrap();
        let duplicate = watchers.values().any(|entry| {
            entry.state.thread_url == canonical && entry.state.status() != WatcherStatus::Stopped
        });
        if duplicate {
            return Err(WatchError::DuplicateWatcher(canonical));
        }

        let id = Uuid::new_v4().to_string();
        let state = Arc::new(WatcherState::new(id.clone(), canonical, schedule, options));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let _task = scheduler::spawn_watcher(state.clone(), self.engine.clone(), cancel_rx);

        let view = state.view();
        watchers.insert(
            id,
            WatcherEntry {
                state,
                cancel: cancel_tx,
            },
        );
        Ok(view)
    }

    pub fn get(&self, id: &str) -> Result<WatcherView> {
        let watchers = self.watchers.read().unwrap();
        watchers
            .get(id)
            .map(|entry| entry.state.view())
            .ok_or_else(|| WatchError::NotFound("watcher".to_string(), id.to_string()))
    }

    /// All watchers, newest first.
    pub fn list(&self) -> Vec<WatcherView> {
        let watchers = self.watchers.read().unwrap();
        let mut views: Vec<WatcherView> =
            watchers.values().map(|entry| entry.state.view()).collect();
        views.sort_by_key(|v| std::cmp::Reverse(v.created_at));
        views
    }

    /// Cancel future runs and mark the watcher stopped. An in-flight run is
    /// left to finish; its outcome is still recorded.
    pub fn stop(&self, id: &str) -> Result<WatcherView> {
        let watchers = self.watchers.read().unwrap();
        let entry = watchers
            .get(id)
            .ok_or_else(|| WatchError::NotFound("watcher".to_string(), id.to_string()))?;
        let _ = entry.cancel.send(true);
        entry.state.mark_stopped();
        Ok(entry.state.view())
    }

    /// Run the watcher's sync once, right now, outside the schedule. The
    /// next scheduled run time is not disturbed. The outcome is recorded on
    /// the watcher like a scheduled run's.
    pub async fn force_run(&self, id: &str) -> Result<SyncResult> {
        let state = {
            let watchers = self.watchers.read().unwrap();
            watchers
                .get(id)
                .map(|entry| entry.state.clone())
                .ok_or_else(|| WatchError::NotFound("watcher".to_string(), id.to_string()))?
        };

        let at = chrono::Utc::now().timestamp();
        match self.engine.sync(&state.thread_url, &state.options).await {
            Ok(result) => {
                state.record_success(at, result.clone());
                Ok(result)
            }
            Err(err) => {
                state.record_failure(at, err.code(), err.to_string());
                Err(err)
            }
        }
    }
}
