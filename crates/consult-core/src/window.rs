//! Admission window calculation
//!
//! Pure functions, no clock access: callers pass `now` in.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Minutes before the scheduled start at which participants may join
pub const EARLY_JOIN_BUFFER_MINUTES: i64 = 5;

/// Range during which joining a booking's call is permitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionWindow {
    pub early_join: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Where `now` falls relative to an admission window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    BeforeWindow,
    Open,
    Ended,
}

/// Window for a slot using the default early-join buffer
pub fn admission_window(start: DateTime<Utc>, duration_minutes: i64) -> AdmissionWindow {
    AdmissionWindow::with_buffer(
        start,
        duration_minutes,
        Duration::minutes(EARLY_JOIN_BUFFER_MINUTES),
    )
}

impl AdmissionWindow {
    pub fn with_buffer(start: DateTime<Utc>, duration_minutes: i64, early_join: Duration) -> Self {
        Self {
            early_join: start - early_join,
            start,
            end: start + Duration::minutes(duration_minutes),
        }
    }

    /// The end instant is inclusive; only `now > end` has ended.
    pub fn phase(&self, now: DateTime<Utc>) -> WindowPhase {
        if now < self.early_join {
            WindowPhase::BeforeWindow
        } else if now > self.end {
            WindowPhase::Ended
        } else {
            WindowPhase::Open
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == WindowPhase::Open
    }

    /// Whole minutes until the window opens, rounded up; zero once reached.
    pub fn minutes_until_open(&self, now: DateTime<Utc>) -> i64 {
        let remaining_ms = (self.early_join - now).num_milliseconds();
        if remaining_ms <= 0 {
            0
        } else {
            (remaining_ms + 59_999) / 60_000
        }
    }
}
