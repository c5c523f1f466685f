//! Background sync: holiday calendar and Moodle course snapshot.
//!
//! A single loop wakes every 60 seconds and runs whichever tasks are due.
//! Last-run timestamps persist in `app_kv` so restarts don't redo work
//! that completed recently.

pub mod courses;
pub mod holidays;

use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Utc};
use tokio::sync::broadcast;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::data::kv;
use crate::state::{AppState, ServiceStatus};

const HOLIDAY_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const COURSE_SYNC_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

// app_kv keys for persisting sync timestamps across restarts.
pub const KV_HOLIDAY_SYNC: &str = "sync.holidays";
pub const KV_COURSE_SYNC: &str = "sync.courses";

/// Convert a persisted UTC timestamp to an `Instant`, preserving the
/// remaining cooldown. A stale or missing timestamp triggers an immediate
/// run.
fn persisted_to_instant(persisted: Option<DateTime<Utc>>, interval: Duration) -> Instant {
    match persisted {
        None => Instant::now() - interval,
        Some(ts) => {
            let elapsed = (Utc::now() - ts).to_std().unwrap_or(interval);
            if elapsed >= interval {
                Instant::now() - interval
            } else {
                Instant::now() - elapsed
            }
        }
    }
}

pub struct SyncService {
    state: AppState,
    holiday_years_back: i32,
    holiday_years_ahead: i32,
}

impl SyncService {
    pub fn new(state: AppState, holiday_years_back: i32, holiday_years_ahead: i32) -> Self {
        Self {
            state,
            holiday_years_back,
            holiday_years_ahead,
        }
    }

    /// Runs the sync loop until a shutdown signal arrives. In-flight work
    /// gets up to 5 seconds to finish before being abandoned.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Sync service started");
        self.state
            .service_statuses
            .set("sync", ServiceStatus::Starting);

        let work_interval = Duration::from_secs(60);
        let mut next_run = time::Instant::now();
        let mut current_work: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;

        let app = &self.state.db.app;
        let persisted_holidays = kv::get_timestamp(app, KV_HOLIDAY_SYNC).await.unwrap_or(None);
        let persisted_courses = kv::get_timestamp(app, KV_COURSE_SYNC).await.unwrap_or(None);
        if persisted_holidays.is_some() || persisted_courses.is_some() {
            info!(
                last_holiday_sync = ?persisted_holidays,
                last_course_sync = ?persisted_courses,
                "Loaded persisted sync timestamps"
            );
        }

        let mut last_holiday_sync = persisted_to_instant(persisted_holidays, HOLIDAY_SYNC_INTERVAL);
        let mut last_course_sync = persisted_to_instant(persisted_courses, COURSE_SYNC_INTERVAL);

        loop {
            tokio::select! {
                _ = time::sleep_until(next_run) => {
                    if let Some((ref handle, _)) = current_work
                        && !handle.is_finished()
                    {
                        trace!("Previous sync cycle still running, skipping");
                        next_run = time::Instant::now() + work_interval;
                        continue;
                    }

                    let should_sync_holidays =
                        last_holiday_sync.elapsed() >= HOLIDAY_SYNC_INTERVAL;
                    let should_sync_courses = last_course_sync.elapsed() >= COURSE_SYNC_INTERVAL;

                    if should_sync_holidays || should_sync_courses {
                        let cancel_token = CancellationToken::new();
                        let work_handle = tokio::spawn({
                            let state = self.state.clone();
                            let cancel_token = cancel_token.clone();
                            let years_back = self.holiday_years_back;
                            let years_ahead = self.holiday_years_ahead;
                            async move {
                                tokio::select! {
                                    _ = Self::run_cycle(
                                        &state,
                                        should_sync_holidays,
                                        should_sync_courses,
                                        years_back,
                                        years_ahead,
                                    ) => {}
                                    _ = cancel_token.cancelled() => {
                                        trace!("Sync work cancelled gracefully");
                                    }
                                }
                            }
                        });

                        // In-memory timestamps advance immediately so the
                        // task is not re-triggered while still running; the
                        // DB copy is written on success inside the task.
                        if should_sync_holidays {
                            last_holiday_sync = Instant::now();
                        }
                        if should_sync_courses {
                            last_course_sync = Instant::now();
                        }
                        current_work = Some((work_handle, cancel_token));
                    }

                    next_run = time::Instant::now() + work_interval;
                }
                _ = shutdown_rx.recv() => {
                    info!("Sync service received shutdown signal");
                    if let Some((handle, cancel_token)) = current_work.take() {
                        cancel_token.cancel();
                        if time::timeout(Duration::from_secs(5), handle).await.is_err() {
                            warn!("Sync work did not complete within 5s, abandoning");
                        }
                    }
                    info!("Sync service exiting gracefully");
                    break;
                }
            }
        }
    }

    async fn run_cycle(
        state: &AppState,
        sync_holidays: bool,
        sync_courses: bool,
        years_back: i32,
        years_ahead: i32,
    ) {
        let app = &state.db.app;
        let mut failed = false;

        let holiday_fut = async {
            if !sync_holidays {
                return false;
            }
            let now_year = Utc::now().year();
            let years = (now_year - years_back)..=(now_year + years_ahead);
            match holidays::sync(app, years).await {
                Ok(count) => {
                    info!(count, "Holiday sync completed");
                    if let Err(e) = kv::set_timestamp(app, KV_HOLIDAY_SYNC, Utc::now()).await {
                        warn!(error = ?e, "Failed to persist holiday sync timestamp");
                    }
                    state.cache.clear_prefix("holidays");
                    false
                }
                Err(e) => {
                    error!(error = ?e, "Holiday sync failed");
                    true
                }
            }
        };

        let course_fut = async {
            if !sync_courses {
                return false;
            }
            match courses::sync(app, &state.db.moodle).await {
                Ok(count) => {
                    info!(count, "Course sync completed");
                    if let Err(e) = kv::set_timestamp(app, KV_COURSE_SYNC, Utc::now()).await {
                        warn!(error = ?e, "Failed to persist course sync timestamp");
                    }
                    state.cache.clear_prefix("courses");
                    false
                }
                Err(e) => {
                    error!(error = ?e, "Course sync failed");
                    true
                }
            }
        };

        let (holiday_failed, course_failed) = tokio::join!(holiday_fut, course_fut);
        failed |= holiday_failed | course_failed;

        state.service_statuses.set(
            "sync",
            if failed {
                ServiceStatus::Error
            } else {
                ServiceStatus::Active
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_timestamp_triggers_immediately() {
        let old = Utc::now() - chrono::Duration::days(3);
        let instant = persisted_to_instant(Some(old), HOLIDAY_SYNC_INTERVAL);
        assert!(instant.elapsed() >= HOLIDAY_SYNC_INTERVAL);
    }

    #[test]
    fn recent_timestamp_keeps_cooldown() {
        let recent = Utc::now() - chrono::Duration::minutes(5);
        let instant = persisted_to_instant(Some(recent), HOLIDAY_SYNC_INTERVAL);
        assert!(instant.elapsed() < HOLIDAY_SYNC_INTERVAL);
    }

    #[test]
    fn missing_timestamp_triggers_immediately() {
        let instant = persisted_to_instant(None, COURSE_SYNC_INTERVAL);
        assert!(instant.elapsed() >= COURSE_SYNC_INTERVAL);
    }
}
