//! Countdown anchored to the server-issued start time.
//!
//! The displayed counter is decremented once per second by `tick()` and
//! periodically overwritten by `reconcile()`, which recomputes it from the
//! deadline so throttled or suspended ticks cannot accumulate drift.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Seconds between two `tick()` calls.
pub const TICK_INTERVAL_SECS: u64 = 1;
/// Seconds between two `reconcile()` calls.
pub const RECONCILE_INTERVAL_SECS: u64 = 30;

/// A session younger than this is considered freshly created.
const FRESHNESS_WINDOW_SECS: i64 = 60;
/// Fresh sessions reporting less than this share of the budget are treated as skewed.
const CLAMP_RATIO: f64 = 0.98;

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartTimeError {
    #[error("unrecognized start timestamp '{0}'")]
    Unparseable(String),
}

/// A parsed server start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTime {
    /// The instant used to anchor the deadline.
    pub instant: DateTime<Utc>,
    /// For timestamps without a zone marker: the same wall-clock reading taken as UTC.
    /// Only consulted by the freshness check.
    pub utc_reading: Option<DateTime<Utc>>,
}

/// Parses the backend's start timestamp.
///
/// Timestamps carrying an offset or `Z` are absolute. Timestamps without one are
/// read as wall-clock time in `backend_zone`.
pub fn parse_start_time(raw: &str, backend_zone: &FixedOffset) -> Result<StartTime, StartTimeError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(StartTime {
            instant: dt.with_timezone(&Utc),
            utc_reading: None,
        });
    }
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Ok(StartTime {
                instant: dt.with_timezone(&Utc),
                utc_reading: None,
            });
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            let local = backend_zone
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| StartTimeError::Unparseable(raw.to_string()))?;
            return Ok(StartTime {
                instant: local.with_timezone(&Utc),
                utc_reading: Some(naive.and_utc()),
            });
        }
    }

    Err(StartTimeError::Unparseable(raw.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running,
    Stopped,
}

/// Result of one tick or reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The timer is not running; nothing was observed.
    Idle,
    Counting(i64),
    Expired,
}

#[derive(Debug, Clone)]
pub struct TimerReconciler {
    budget_seconds: i64,
    start: StartTime,
    end_time: DateTime<Utc>,
    remaining: i64,
    phase: TimerPhase,
    clamped: bool,
}

impl TimerReconciler {
    /// Creates an idle timer. An unparseable start timestamp anchors the deadline at `now`.
    pub fn new(
        raw_start: &str,
        budget_seconds: i64,
        backend_zone: &FixedOffset,
        now: DateTime<Utc>,
    ) -> Self {
        let budget_seconds = budget_seconds.max(0);
        let start = parse_start_time(raw_start, backend_zone).unwrap_or_else(|e| {
            warn!("{e}; anchoring interview timer at current time");
            StartTime {
                instant: now,
                utc_reading: None,
            }
        });
        Self {
            budget_seconds,
            start,
            end_time: start.instant + Duration::seconds(budget_seconds),
            remaining: budget_seconds,
            phase: TimerPhase::Idle,
            clamped: false,
        }
    }

    pub fn start(&mut self) {
        if self.phase == TimerPhase::Idle {
            self.phase = TimerPhase::Running;
            debug!("Interview timer started, deadline {}", self.end_time);
        }
    }

    pub fn stop(&mut self) {
        if self.phase != TimerPhase::Stopped {
            self.phase = TimerPhase::Stopped;
            debug!("Interview timer stopped with {}s remaining", self.remaining);
        }
    }

    pub fn dispose(mut self) {
        self.stop();
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn remaining_seconds(&self) -> i64 {
        self.remaining
    }

    pub fn budget_seconds(&self) -> i64 {
        self.budget_seconds
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start.instant
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Per-second countdown step. Never goes below zero.
    pub fn tick(&mut self) -> TimerOutcome {
        if self.phase != TimerPhase::Running {
            return TimerOutcome::Idle;
        }
        if self.remaining > 0 {
            self.remaining -= 1;
        }
        self.outcome()
    }

    /// Recomputes the counter from the deadline.
    ///
    /// While the session has no persisted answers and was started less than a
    /// minute ago, a result far below (or above) the full budget is taken as a
    /// clock or time zone artifact: the counter is reset to the budget and the
    /// deadline re-anchored at `now`.
    pub fn reconcile(&mut self, now: DateTime<Utc>, has_answers: bool) -> TimerOutcome {
        if self.phase != TimerPhase::Running {
            return TimerOutcome::Idle;
        }

        let mut remaining = (self.end_time - now).num_seconds().max(0);
        let skewed = (remaining as f64) < CLAMP_RATIO * self.budget_seconds as f64
            || remaining > self.budget_seconds;

        if skewed && !has_answers && !self.clamped && self.looks_fresh(now) {
            warn!(
                "Computed {}s remaining for a session started at {}; treating as clock skew and resetting to {}s",
                remaining, self.start.instant, self.budget_seconds
            );
            self.end_time = now + Duration::seconds(self.budget_seconds);
            self.clamped = true;
            remaining = self.budget_seconds;
        }

        if (self.remaining - remaining).abs() > 1 {
            info!(
                "Timer drift corrected: displayed {}s, actual {}s",
                self.remaining, remaining
            );
        }
        self.remaining = remaining;
        self.outcome()
    }

    fn looks_fresh(&self, now: DateTime<Utc>) -> bool {
        let elapsed = (now - self.start.instant).num_seconds();
        if elapsed < FRESHNESS_WINDOW_SECS {
            return true;
        }
        // Indistinguishable from a session started exactly `offset` ago; the
        // caller's `has_answers` guard is what keeps real sessions from resetting.
        self.start
            .utc_reading
            .map(|utc| (now - utc).num_seconds().abs() < FRESHNESS_WINDOW_SECS)
            .unwrap_or(false)
    }

    fn outcome(&self) -> TimerOutcome {
        if self.remaining == 0 {
            TimerOutcome::Expired
        } else {
            TimerOutcome::Counting(self.remaining)
        }
    }
}
