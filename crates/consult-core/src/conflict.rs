//! Slot conflict checking
//!
//! Intervals are half-open `[start, end)`: a booking ending at 10:30 does not
//! conflict with one starting at 10:30.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::LifecycleStore;
use crate::types::{Booking, BookingStatus};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn from_duration(start: DateTime<Utc>, duration_minutes: i64) -> Self {
        Self::new(start, start + Duration::minutes(duration_minutes))
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Result of checking a candidate slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotCheck {
    Available,
    Conflict { booking_id: String },
}

impl SlotCheck {
    pub fn is_available(&self) -> bool {
        matches!(self, SlotCheck::Available)
    }
}

/// Decide whether `candidate` is free against a provider's existing bookings.
///
/// Cancelled bookings never block a slot. `exclude_id` lets a freshly inserted
/// booking be re-verified against everything but itself.
pub fn check_slot(candidate: &Interval, existing: &[Booking], exclude_id: Option<&str>) -> SlotCheck {
    existing
        .iter()
        .filter(|b| b.status != BookingStatus::Cancelled)
        .filter(|b| exclude_id.map_or(true, |id| b.id != id))
        .find(|b| b.interval().overlaps(candidate))
        .map(|b| SlotCheck::Conflict {
            booking_id: b.id.clone(),
        })
        .unwrap_or(SlotCheck::Available)
}

/// Read-only availability check against the store.
///
/// Booking creation does not rely on this answer; it re-runs the same check
/// inside the store transaction that inserts the booking.
#[derive(Clone)]
pub struct SlotConflictChecker {
    store: Arc<dyn LifecycleStore>,
}

impl SlotConflictChecker {
    pub fn new(store: Arc<dyn LifecycleStore>) -> Self {
        Self { store }
    }

    pub async fn check(
        &self,
        provider_id: &str,
        start: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<SlotCheck> {
        let candidate = Interval::from_duration(start, duration_minutes);
        let existing = self
            .store
            .find_overlapping(provider_id, candidate.start, candidate.end)
            .await?;
        Ok(check_slot(&candidate, &existing, None))
    }
}
