//! # Booking State Machine
//!
//! ```text
//! SCHEDULED ──join──▶ IN_PROGRESS ──last leave after end──▶ COMPLETED
//!     │                                                        ▲
//!     ├──cancel──▶ CANCELLED                                   │
//!     └──────────────── sweep (nobody joined) ─────────────────┘
//! ```
//!
//! Every move goes through [`BookingStatus::can_transition_to`] and is
//! written with a compare-and-set, so a concurrent writer never moves a
//! booking backwards. A lost race is resolved by re-reading the row.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, SessionEvent, SessionEventKind};
use crate::store::LifecycleStore;
use crate::types::{Booking, BookingStatus, SweepReport};
use crate::{Error, Result};

#[derive(Clone)]
pub struct BookingStateMachine {
    store: Arc<dyn LifecycleStore>,
    events: EventBus,
    sweep_margin: Duration,
}

impl BookingStateMachine {
    pub fn new(store: Arc<dyn LifecycleStore>, events: EventBus, sweep_margin: Duration) -> Self {
        Self {
            store,
            events,
            sweep_margin,
        }
    }

    pub async fn load(&self, booking_id: &str) -> Result<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("booking {}", booking_id)))
    }

    /// Apply one edge of the state machine to `booking`
    pub async fn transition(
        &self,
        booking: &Booking,
        to: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<Booking> {
        let from = booking.status;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        if self.store.transition_booking(&booking.id, from, to, now).await? {
            info!("📋 Booking {} {} -> {}", booking.id, from, to);
            self.events.publish(SessionEvent::for_booking(
                booking,
                now,
                SessionEventKind::BookingStatusChanged { from, to },
            ));

            let mut updated = booking.clone();
            updated.status = to;
            updated.updated_at = now;
            return Ok(updated);
        }

        // Someone else moved it first
        let current = self.load(&booking.id).await?;
        if current.status == to {
            debug!("Booking {} already {}", current.id, to);
            Ok(current)
        } else {
            Err(Error::InvalidTransition {
                from: current.status,
                to,
            })
        }
    }

    /// Cancel a SCHEDULED booking on behalf of one of its parties
    pub async fn cancel(&self, booking_id: &str, actor_id: &str, now: DateTime<Utc>) -> Result<Booking> {
        let booking = self.load(booking_id).await?;
        if !booking.is_party(actor_id) {
            warn!("🚫 {} tried to cancel booking {} they are not party to", actor_id, booking_id);
            return Err(Error::Unauthorized);
        }
        self.transition(&booking, BookingStatus::Cancelled, now).await
    }

    /// First successful join moves SCHEDULED to IN_PROGRESS; later joins are no-ops
    pub async fn advance_on_join(&self, booking_id: &str, now: DateTime<Utc>) -> Result<Booking> {
        let booking = self.load(booking_id).await?;
        if booking.status == BookingStatus::InProgress {
            debug!("Booking {} already in progress", booking_id);
            return Ok(booking);
        }
        self.transition(&booking, BookingStatus::InProgress, now).await
    }

    /// Put a booking advanced by a join that then failed back to SCHEDULED.
    /// Only the CAS from IN_PROGRESS applies; anything else is left alone.
    pub async fn undo_advance(&self, booking_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let reverted = self
            .store
            .transition_booking(booking_id, BookingStatus::InProgress, BookingStatus::Scheduled, now)
            .await?;
        if reverted {
            warn!("↩️ Booking {} returned to SCHEDULED after a failed join", booking_id);
        }
        Ok(reverted)
    }

    /// Complete an IN_PROGRESS booking once its scheduled end has been reached
    pub async fn complete_if_all_left(&self, booking_id: &str, now: DateTime<Utc>) -> Result<Booking> {
        let booking = self.load(booking_id).await?;
        if booking.status != BookingStatus::InProgress {
            debug!("Booking {} is {}, nothing to complete", booking_id, booking.status);
            return Ok(booking);
        }
        if now < booking.ends_at() {
            debug!(
                "Booking {} emptied before its end at {}, staying in progress",
                booking_id,
                booking.ends_at()
            );
            return Ok(booking);
        }
        self.transition(&booking, BookingStatus::Completed, now).await
    }

    /// Complete every SCHEDULED booking whose end plus the safety margin has passed
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let stale = self.store.list_stale_scheduled(now - self.sweep_margin).await?;
        Ok(self.complete_stale(&stale, now).await)
    }

    /// Complete the given bookings if they are stale, each independently
    pub async fn complete_stale(&self, bookings: &[Booking], now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for booking in bookings {
            if !self.is_stale(booking, now) {
                continue;
            }
            match self.transition(booking, BookingStatus::Completed, now).await {
                Ok(_) => report.completed.push(booking.id.clone()),
                Err(Error::InvalidTransition { from, .. }) => {
                    warn!("⚠️ Sweep skipped booking {}: now {}", booking.id, from);
                    report.skipped.push(booking.id.clone());
                }
                Err(e) => {
                    error!("❌ Sweep failed for booking {}: {}", booking.id, e);
                    report.skipped.push(booking.id.clone());
                }
            }
        }

        if !report.completed.is_empty() {
            info!("🧹 Sweep completed {} expired bookings", report.completed.len());
        }
        report
    }

    pub fn is_stale(&self, booking: &Booking, now: DateTime<Utc>) -> bool {
        booking.status == BookingStatus::Scheduled && booking.ends_at() + self.sweep_margin < now
    }
}
