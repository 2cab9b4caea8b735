//! Watcher execution loops.
//!
//! Each watcher runs in its own tokio task: one watcher failing, panicking,
//! or running long never delays a sibling's tick. The loop computes the
//! next run time, sleeps until it (or until the watcher is stopped), runs
//! one sync, records the outcome on the watcher state, and repeats.
//!
//! Schedule semantics:
//!
//! - **Interval**: next run = last run start + period. When the process
//!   slept past one or more ticks, the job runs once immediately and the
//!   period re-anchors at that run — missed ticks are skipped, not
//!   bursted.
//! - **Calendar**: cron expression evaluated in UTC, next run computed
//!   forward from the current time.
//!
//! Every run is executed on a child task and its result — including a
//! panic — is absorbed at the loop boundary, so the schedule continues
//! regardless of how a run ended.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Result, WatchError};
use crate::sync::SyncEngine;
use crate::watch::{Schedule, WatcherState};

/// Parse a five- or six-field cron expression. Five-field expressions get
/// a seconds field of `0` prepended; evaluation is always UTC.
pub fn parse_calendar(expression: &str) -> Result<cron::Schedule> {
    let trimmed = expression.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {trimmed}"),
        6 | 7 => trimmed.to_string(),
        n => {
            return Err(WatchError::InvalidSchedule(format!(
                "expected 5 or 6 cron fields, got {n}"
            )))
        }
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| WatchError::InvalidSchedule(format!("{trimmed}: {e}")))
}

/// Next interval run in unix seconds. `None` for `last_start` means the
/// watcher has never run: the first run is immediate.
pub fn next_interval_run(last_start: Option<i64>, now: i64, period_secs: i64) -> i64 {
    match last_start {
        None => now,
        Some(last) => {
            let next = last.saturating_add(period_secs);
            if next <= now {
                // Missed one or more ticks; run once now, re-anchor.
                now
            } else {
                next
            }
        }
    }
}

/// Next calendar run in unix seconds, strictly after `now`. `None` when
/// the expression has no future occurrence.
pub fn next_calendar_run(schedule: &cron::Schedule, now: i64) -> Option<i64> {
    let now: DateTime<Utc> = DateTime::from_timestamp(now, 0)?;
    schedule.after(&now).next().map(|dt| dt.timestamp())
}

/// Spawn the execution loop for one watcher.
///
/// The loop exits when `cancel` flips to true; an in-flight run is allowed
/// to finish first. On exit the watcher is marked stopped.
pub(crate) fn spawn_watcher(
    state: Arc<WatcherState>,
    engine: Arc<SyncEngine>,
    mut cancel: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // Validated at creation; a parse failure here means the watcher
        // can not run at all and stops itself.
        let calendar = match &state.schedule {
            Schedule::Calendar { expression } => match parse_calendar(expression) {
                Ok(schedule) => Some(schedule),
                Err(err) => {
                    warn!(watcher = %state.id, error = %err, "unusable calendar schedule");
                    state.mark_stopped();
                    return;
                }
            },
            Schedule::Interval { .. } => None,
        };

        let mut last_start: Option<i64> = None;

        loop {
            if *cancel.borrow() {
                break;
            }

            let now = Utc::now().timestamp();
            // The first run is immediate for both schedule kinds; the
            // cadence applies from that run onward.
            let next = match (&state.schedule, last_start) {
                (_, None) => now,
                (Schedule::Interval { minutes }, Some(_)) => {
                    next_interval_run(last_start, now, (*minutes * 60) as i64)
                }
                (Schedule::Calendar { .. }, Some(_)) => {
                    match calendar.as_ref().and_then(|s| next_calendar_run(s, now)) {
                        Some(next) => next,
                        None => {
                            warn!(watcher = %state.id, "calendar schedule has no future runs");
                            break;
                        }
                    }
                }
            };
            state.set_next_run(Some(next));

            let wait = Duration::from_secs(next.saturating_sub(now).max(0) as u64);
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    let started = Utc::now().timestamp();
                    last_start = Some(started);
                    run_once(&state, &engine, started).await;
                }
            }
        }

        state.mark_stopped();
    })
}

/// Execute one sync for the watcher and record the outcome.
///
/// The sync runs on a child task so that even a panic is contained here
/// and recorded as a failed run instead of tearing down the loop.
async fn run_once(state: &Arc<WatcherState>, engine: &Arc<SyncEngine>, started: i64) {
    state.set_running();

    let run = {
        let engine = engine.clone();
        let url = state.thread_url.clone();
        let options = state.options;
        tokio::spawn(async move { engine.sync(&url, &options).await })
    };

    match run.await {
        Ok(Ok(result)) => {
            info!(
                watcher = %state.id,
                thread = %state.thread_url,
                inserted = result.inserted,
                updated = result.updated,
                "scheduled sync complete"
            );
            state.record_success(started, result);
        }
        Ok(Err(err)) => {
            warn!(
                watcher = %state.id,
                thread = %state.thread_url,
                code = err.code(),
                error = %err,
                "scheduled sync failed"
            );
            state.record_failure(started, err.code(), err.to_string());
        }
        Err(join_err) => {
            warn!(
                watcher = %state.id,
                thread = %state.thread_url,
                error = %join_err,
                "scheduled sync aborted"
            );
            state.record_failure(started, "panic", join_err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_interval_run_is_immediate() {
        assert_eq!(next_interval_run(None, 1_000, 600), 1_000);
    }

    #[test]
    fn interval_runs_anchor_on_last_start() {
        assert_eq!(next_interval_run(Some(1_000), 1_100, 600), 1_600);
    }

    #[test]
    fn missed_interval_ticks_collapse_to_one_immediate_run() {
        // Process slept through four ticks; next run is now, not a burst.
        assert_eq!(next_interval_run(Some(1_000), 4_000, 600), 4_000);
        // After re-anchoring at 4_000 the cadence resumes from there.
        assert_eq!(next_interval_run(Some(4_000), 4_010, 600), 4_600);
    }

    #[test]
    fn five_field_cron_gets_seconds_prepended() {
        let schedule = parse_calendar("0 8 * * *").unwrap();
        // 2023-11-14 22:13:20 UTC → next 08:00 is the following day.
        let next = next_calendar_run(&schedule, 1_700_000_000).unwrap();
        assert_eq!(next, 1_700_035_200);
    }

    #[test]
    fn six_field_cron_is_accepted_as_is() {
        let schedule = parse_calendar("30 */5 * * * *").unwrap();
        let next = next_calendar_run(&schedule, 1_700_000_000).unwrap();
        assert!(next > 1_700_000_000);
        assert_eq!(next % 60, 30);
    }

    #[test]
    fn calendar_runs_advance_with_the_clock() {
        let schedule = parse_calendar("0 * * * *").unwrap();
        let first = next_calendar_run(&schedule, 1_700_000_000).unwrap();
        let second = next_calendar_run(&schedule, first).unwrap();
        assert_eq!(second - first, 3_600);
    }

    #[test]
    fn malformed_cron_is_rejected() {
        assert!(parse_calendar("not a cron").is_err());
        assert!(parse_calendar("* * *").is_err());
        assert!(parse_calendar("99 99 * * *").is_err());
    }
}
