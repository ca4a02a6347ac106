//! Mylist export polling.
//!
//! After an export is queued the server announces the finished archive as a
//! notification. The poller decides when to ask for the notification list:
//! first after one minute, then one minute later each time, never more than
//! an hour apart, and not at all after two days.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

/// Delay before the first check, and the growth per check, in seconds.
pub const POLL_STEP_SECS: i64 = 60;

/// Longest gap between two checks, in seconds.
pub const POLL_MAX_INTERVAL_SECS: i64 = 60 * 60;

/// Polling gives up this long after the export was queued, in seconds.
pub const POLL_DEADLINE_SECS: i64 = 48 * 60 * 60;

/// What the engine should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    Idle,
    /// Enqueue a NOTIFYLIST.
    Check,
    /// The deadline passed; polling stopped.
    Expired,
}

#[derive(Debug, Clone, Copy)]
struct Schedule {
    started: DateTime<Utc>,
    next_check: DateTime<Utc>,
    interval: Duration,
}

/// Export-notification poll schedule.
#[derive(Debug, Clone, Default)]
pub struct ExportPoller {
    schedule: Option<Schedule>,
}

impl ExportPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.schedule.is_some()
    }

    /// Starts (or restarts) polling for an export queued at `now`.
    pub fn start(&mut self, now: DateTime<Utc>) {
        let step = Duration::seconds(POLL_STEP_SECS);
        self.schedule = Some(Schedule {
            started: now,
            next_check: now + step,
            interval: step,
        });
        info!("Waiting for mylist export");
    }

    pub fn stop(&mut self) {
        if self.schedule.take().is_some() {
            debug!("Export polling stopped");
        }
    }

    /// Time of the next check, if polling.
    pub fn next_check(&self) -> Option<DateTime<Utc>> {
        self.schedule.map(|s| s.next_check)
    }

    pub fn poll(&mut self, now: DateTime<Utc>) -> PollAction {
        let Some(schedule) = self.schedule.as_mut() else {
            return PollAction::Idle;
        };

        if now - schedule.started >= Duration::seconds(POLL_DEADLINE_SECS) {
            self.schedule = None;
            info!("Gave up waiting for mylist export");
            return PollAction::Expired;
        }
        if now < schedule.next_check {
            return PollAction::Idle;
        }

        schedule.interval = (schedule.interval + Duration::seconds(POLL_STEP_SECS))
            .min(Duration::seconds(POLL_MAX_INTERVAL_SECS));
        schedule.next_check = now + schedule.interval;
        debug!(
            "Export check due, next in {}s",
            schedule.interval.num_seconds()
        );
        PollAction::Check
    }
}
