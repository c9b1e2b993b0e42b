//! Lifecycle event fan-out
//!
//! Every state change the engine commits is published on a broadcast
//! channel. Subscribers get a stream filtered to the bookings they are a
//! party to; slow subscribers skip missed events rather than block writers.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{trace, warn};

use crate::types::{Booking, BookingStatus, ParticipantRole};

pub type EventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

/// A committed change to one booking or its call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvent {
    pub booking_id: String,
    pub client_id: String,
    pub provider_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    BookingCreated {
        starts_at: DateTime<Utc>,
        duration_minutes: i64,
    },
    BookingStatusChanged {
        from: BookingStatus,
        to: BookingStatus,
    },
    CallStarted {
        call_id: String,
        channel_name: String,
    },
    ParticipantJoined {
        call_id: String,
        user_id: String,
        role: ParticipantRole,
    },
    ParticipantLeft {
        call_id: String,
        user_id: String,
        duration_secs: i64,
    },
    SettingChanged {
        call_id: String,
        user_id: String,
        setting: String,
        enabled: bool,
    },
    CallEnded {
        call_id: String,
        duration_secs: i64,
    },
}

impl SessionEvent {
    pub fn for_booking(booking: &Booking, at: DateTime<Utc>, kind: SessionEventKind) -> Self {
        Self {
            booking_id: booking.id.clone(),
            client_id: booking.client_id.clone(),
            provider_id: booking.provider_id.clone(),
            at,
            kind,
        }
    }

    /// Whether `user_id` is a party to the event's booking
    pub fn concerns(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.provider_id == user_id
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            SessionEventKind::BookingCreated { .. } => "booking_created",
            SessionEventKind::BookingStatusChanged { .. } => "booking_status_changed",
            SessionEventKind::CallStarted { .. } => "call_started",
            SessionEventKind::ParticipantJoined { .. } => "participant_joined",
            SessionEventKind::ParticipantLeft { .. } => "participant_left",
            SessionEventKind::SettingChanged { .. } => "setting_changed",
            SessionEventKind::CallEnded { .. } => "call_ended",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: SessionEvent) {
        let kind = event.type_name();
        let booking_id = event.booking_id.clone();
        match self.sender.send(event) {
            Ok(receivers) => trace!("📣 {} for {} delivered to {} receivers", kind, booking_id, receivers),
            Err(_) => trace!("📣 {} for {} had no receivers", kind, booking_id),
        }
    }

    /// Stream of events concerning `user_id`
    pub fn subscribe(&self, user_id: &str) -> EventStream {
        let user_id = user_id.to_string();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| match item {
            Ok(event) if event.concerns(&user_id) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("⚠️ Event subscriber {} lagged, skipped {} events", user_id, skipped);
                None
            }
        });
        Box::pin(stream)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
