//! # Admission Gate
//!
//! Decides whether a caller may enter a booking's call right now and, if
//! so, hands back a media credential for the booking's channel.
//!
//! Checks run in this order, each re-reading the store:
//!
//! 1. the booking exists (`NotFound`)
//! 2. the caller is its client or provider (`Forbidden`)
//! 3. the booking is not CANCELLED or COMPLETED (`NotJoinable`)
//! 4. the admission window is open (`TooEarly`, `CallEnded`)
//!
//! The rest runs under the booking's lock. No participant row is written
//! until the transport has issued a credential; a call created by a join
//! that then fails is discarded again, and a booking that join advanced to
//! IN_PROGRESS goes back to SCHEDULED.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::booking::BookingStateMachine;
use crate::call::CallSessionTracker;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::transport::{issue_with_retry, uid_for, CredentialRequest, MediaTransport};
use crate::types::{Booking, BookingStatus, Call, DeviceInfo, JoinGrant, ParticipantRole};
use crate::window::WindowPhase;
use crate::{Error, Result};

#[derive(Clone)]
pub struct AdmissionGate {
    bookings: BookingStateMachine,
    calls: CallSessionTracker,
    transport: Arc<dyn MediaTransport>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AdmissionGate {
    pub fn new(
        bookings: BookingStateMachine,
        calls: CallSessionTracker,
        transport: Arc<dyn MediaTransport>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            bookings,
            calls,
            transport,
            clock,
            config,
        }
    }

    /// Validate the caller against the booking without side effects
    pub fn check(&self, booking: &Booking, actor_id: &str) -> Result<ParticipantRole> {
        let role = booking.role_of(actor_id).ok_or(Error::Forbidden)?;

        if booking.status.is_terminal() {
            return Err(Error::NotJoinable {
                status: booking.status,
            });
        }

        let now = self.clock.now();
        let window = booking.window(self.config.early_join_buffer());
        match window.phase(now) {
            WindowPhase::BeforeWindow => Err(Error::TooEarly {
                minutes_until_start: window.minutes_until_open(now),
            }),
            WindowPhase::Ended => Err(Error::CallEnded),
            WindowPhase::Open => Ok(role),
        }
    }

    #[instrument(skip(self, device))]
    pub async fn request_join(
        &self,
        booking_id: &str,
        actor_id: &str,
        device: &DeviceInfo,
    ) -> Result<JoinGrant> {
        let booking = self.bookings.load(booking_id).await?;
        if let Err(e) = self.check(&booking, actor_id) {
            if e.is_temporal() {
                debug!("Join for {} by {} refused: {}", booking_id, actor_id, e);
            } else {
                warn!("🚫 Join for {} by {} refused: {}", booking_id, actor_id, e);
            }
            return Err(e);
        }

        let _guard = self.calls.lock_booking(booking_id).await;

        // Status may have moved while waiting for the lock
        let booking = self.bookings.load(booking_id).await?;
        let role = self.check(&booking, actor_id)?;
        let now = self.clock.now();

        let (call, created) = self.calls.find_or_create_open_call(&booking, now).await?;

        let request = CredentialRequest {
            channel_name: call.channel_name.clone(),
            uid: uid_for(actor_id),
            role,
            expires_at: now + self.config.credential_ttl(),
        };
        let credential = match issue_with_retry(
            &self.transport,
            &request,
            self.config.transport_timeout(),
            self.config.transport_retries,
        )
        .await
        {
            Ok(credential) => credential,
            Err(e) => {
                self.compensate(&call, created).await;
                return Err(e);
            }
        };

        let advanced_here = booking.status == BookingStatus::Scheduled;
        let booking = match self.bookings.advance_on_join(booking_id, now).await {
            Ok(booking) => booking,
            Err(e) => {
                self.compensate(&call, created).await;
                return Err(match e {
                    Error::InvalidTransition { from, .. } if from.is_terminal() => {
                        Error::NotJoinable { status: from }
                    }
                    other => other,
                });
            }
        };

        let participant = match self
            .calls
            .record_join(&booking, &call.id, actor_id, role, device, now)
            .await
        {
            Ok(participant) => participant,
            Err(e) => {
                error!("❌ Recording join of {} on {} failed: {}", actor_id, booking_id, e);
                if advanced_here {
                    if let Err(undo) = self.bookings.undo_advance(booking_id, now).await {
                        error!("❌ Booking {} left IN_PROGRESS without a participant: {}", booking_id, undo);
                    }
                }
                self.compensate(&call, created).await;
                return Err(e);
            }
        };

        info!("✅ {} admitted to {} as {}", actor_id, call.channel_name, role);
        Ok(JoinGrant {
            credential: credential.token,
            channel_name: call.channel_name,
            uid: request.uid,
            call_id: call.id,
            participant_id: participant.id,
            role,
            expires_at: credential.expires_at,
        })
    }

    async fn compensate(&self, call: &Call, created: bool) {
        if !created {
            return;
        }
        if let Err(e) = self.calls.discard_if_empty(&call.id).await {
            warn!("⚠️ Could not discard call {} after failed join: {}", call.id, e);
        }
    }
}
