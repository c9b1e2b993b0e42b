//! # Call Session Tracker
//!
//! Keeps the single open call of a booking and its participant rows
//! consistent while two participants join, leave and toggle devices
//! concurrently.
//!
//! Mutating methods expect the caller to hold the booking's lock from
//! [`CallSessionTracker::lock_booking`]. The store's partial unique index on
//! open calls backs this up if the lock is ever bypassed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};

use crate::booking::BookingStateMachine;
use crate::events::{EventBus, SessionEvent, SessionEventKind};
use crate::locks::KeyedLocks;
use crate::store::LifecycleStore;
use crate::types::{Booking, Call, CallParticipant, CallSetting, DeviceInfo, ParticipantRole};
use crate::{Error, Result};

/// Highest network quality score a client may report
pub const MAX_NETWORK_QUALITY: i64 = 5;

#[derive(Clone)]
pub struct CallSessionTracker {
    store: Arc<dyn LifecycleStore>,
    events: EventBus,
    bookings: BookingStateMachine,
    locks: KeyedLocks,
    orphan_grace: Duration,
}

impl CallSessionTracker {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        events: EventBus,
        bookings: BookingStateMachine,
        orphan_grace: Duration,
    ) -> Self {
        Self {
            store,
            events,
            bookings,
            locks: KeyedLocks::new("booking"),
            orphan_grace,
        }
    }

    pub async fn lock_booking(&self, booking_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(booking_id).await
    }

    /// The booking's open call, created if absent. The flag is true when
    /// this call created it.
    pub async fn find_or_create_open_call(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<(Call, bool)> {
        let (call, created) = self
            .store
            .get_or_create_open_call(&Call::open_for(&booking.id, now))
            .await?;

        if created {
            info!("📞 Opened call {} on {} for booking {}", call.id, call.channel_name, booking.id);
            self.events.publish(SessionEvent::for_booking(
                booking,
                now,
                SessionEventKind::CallStarted {
                    call_id: call.id.clone(),
                    channel_name: call.channel_name.clone(),
                },
            ));
        }
        Ok((call, created))
    }

    pub async fn open_call(&self, booking_id: &str) -> Result<Option<Call>> {
        self.store.find_open_call(booking_id).await
    }

    pub async fn load_call(&self, call_id: &str) -> Result<Call> {
        self.store
            .get_call(call_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("call {}", call_id)))
    }

    /// Insert or refresh the caller's participant row
    #[instrument(skip(self, booking, device), fields(booking_id = %booking.id))]
    pub async fn record_join(
        &self,
        booking: &Booking,
        call_id: &str,
        user_id: &str,
        role: ParticipantRole,
        device: &DeviceInfo,
        now: DateTime<Utc>,
    ) -> Result<CallParticipant> {
        let participant = self
            .store
            .upsert_participant_join(call_id, user_id, role, device, now)
            .await?;

        info!("👤 {} joined call {} as {}", user_id, call_id, role);
        self.events.publish(SessionEvent::for_booking(
            booking,
            now,
            SessionEventKind::ParticipantJoined {
                call_id: call_id.to_string(),
                user_id: user_id.to_string(),
                role,
            },
        ));
        Ok(participant)
    }

    /// Close the caller's presence. When the last participant leaves the
    /// call is completed and the booking may complete with it.
    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    pub async fn record_leave(
        &self,
        booking: &Booking,
        call_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CallParticipant>> {
        let Some(left) = self.store.mark_participant_left(call_id, user_id, now).await? else {
            debug!("{} was not present in call {}, ignoring leave", user_id, call_id);
            return Ok(None);
        };

        let duration_secs = left.duration_secs.unwrap_or(0);
        info!("👋 {} left call {} after {}s", user_id, call_id, duration_secs);
        self.events.publish(SessionEvent::for_booking(
            booking,
            now,
            SessionEventKind::ParticipantLeft {
                call_id: call_id.to_string(),
                user_id: user_id.to_string(),
                duration_secs,
            },
        ));

        if self.store.count_present_participants(call_id).await? == 0 {
            self.end_call(booking, call_id, now).await?;
        }
        Ok(Some(left))
    }

    async fn end_call(&self, booking: &Booking, call_id: &str, now: DateTime<Utc>) -> Result<()> {
        let call = self.load_call(call_id).await?;
        let duration_secs = (now - call.started_at).num_seconds().max(0);

        if self.store.complete_call(call_id, now, duration_secs).await? {
            info!("📴 Call {} completed after {}s", call_id, duration_secs);
            self.events.publish(SessionEvent::for_booking(
                booking,
                now,
                SessionEventKind::CallEnded {
                    call_id: call_id.to_string(),
                    duration_secs,
                },
            ));
        }

        self.bookings.complete_if_all_left(&booking.id, now).await?;
        Ok(())
    }

    /// Toggle audio, video or screen share for a present participant.
    /// Returns false if the caller is not currently in the call.
    pub async fn record_setting(
        &self,
        booking: &Booking,
        call_id: &str,
        user_id: &str,
        setting: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let setting = CallSetting::parse(setting)?;
        let updated = self
            .store
            .update_participant_setting(call_id, user_id, setting, enabled)
            .await?;

        if updated {
            debug!("{} set {} = {} in call {}", user_id, setting.as_str(), enabled, call_id);
            self.events.publish(SessionEvent::for_booking(
                booking,
                now,
                SessionEventKind::SettingChanged {
                    call_id: call_id.to_string(),
                    user_id: user_id.to_string(),
                    setting: setting.as_str().to_string(),
                    enabled,
                },
            ));
        } else {
            debug!("{} is not in call {}, ignoring {} toggle", user_id, call_id, setting.as_str());
        }
        Ok(updated)
    }

    pub async fn record_network_quality(&self, call_id: &str, user_id: &str, score: i64) -> Result<bool> {
        if !(0..=MAX_NETWORK_QUALITY).contains(&score) {
            return Err(Error::validation(format!(
                "network quality must be 0..={}, got {}",
                MAX_NETWORK_QUALITY, score
            )));
        }
        self.store.update_network_quality(call_id, user_id, score).await
    }

    /// Remove a call that never got a participant
    pub async fn discard_if_empty(&self, call_id: &str) -> Result<bool> {
        let discarded = self.store.delete_call_if_empty(call_id).await?;
        if discarded {
            warn!("🗑️ Discarded empty call {}", call_id);
        }
        Ok(discarded)
    }

    /// Remove open calls older than the grace period that nobody joined
    pub async fn close_orphaned_calls(&self, now: DateTime<Utc>) -> Result<usize> {
        let orphans = self.store.list_empty_open_calls(now - self.orphan_grace).await?;
        let mut removed = 0;

        for call in orphans {
            // A join in flight holds this lock until its participant row exists
            let _guard = self.lock_booking(&call.booking_id).await;
            match self.discard_if_empty(&call.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => error!("❌ Could not remove orphaned call {}: {}", call.id, e),
            }
        }
        self.locks.prune();
        Ok(removed)
    }

    pub async fn participants(&self, call_id: &str) -> Result<Vec<CallParticipant>> {
        self.store.list_participants(call_id).await
    }
}
