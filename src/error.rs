//! Typed failure taxonomy for sync and watcher operations.
//!
//! Every failure inside a sync cycle is caught at the orchestrator boundary
//! and surfaces as one of these variants; nothing below this layer is allowed
//! to escape as an untyped fault into the scheduler. The HTTP layer maps each
//! variant to a machine-readable code and status via [`WatchError::code`].

use thiserror::Error;

/// The primary error type for all threadwatch operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Fetched data is missing required fields (thread URL, title) or is
    /// otherwise unusable. Aborts the current run; not retried automatically.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// Network failure, fetch-agent error, or timeout while fetching.
    /// Retryable on the next scheduled tick, never within the same run.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The storage layer rejected a read or write. The run is aborted with
    /// no partial commit and the watcher records an errored run.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// A sync for this thread is already in flight. Back off and retry;
    /// this is a concurrency guard, not an operator-attention error.
    #[error("sync already in progress for {0}")]
    SyncInProgress(String),

    /// A watcher already exists for this thread target. Stop it first.
    #[error("watcher already exists for {0}")]
    DuplicateWatcher(String),

    /// Unknown thread, watcher id, or source-side 404.
    #[error("{0} not found: {1}")]
    NotFound(String, String),

    /// A watch request carried an unusable schedule (zero interval, bad
    /// cron expression). Rejected at creation, never at run time.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl WatchError {
    /// Machine-readable error code used in API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedSnapshot(_) => "malformed_snapshot",
            Self::FetchFailed(_) => "fetch_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::SyncInProgress(_) => "sync_in_progress",
            Self::DuplicateWatcher(_) => "duplicate_watcher",
            Self::NotFound(_, _) => "not_found",
            Self::InvalidSchedule(_) => "invalid_schedule",
        }
    }
}

impl From<sqlx::Error> for WatchError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceFailed(err.to_string())
    }
}

/// A specialized Result type for threadwatch operations.
pub type Result<T> = std::result::Result<T, WatchError>;
