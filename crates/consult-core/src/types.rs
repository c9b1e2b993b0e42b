//! Core types for consult-core

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::Interval;
use crate::window::{AdmissionWindow, WindowPhase};

/// Booking lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Scheduled,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "SCHEDULED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(BookingStatus::Scheduled),
            "IN_PROGRESS" => Some(BookingStatus::InProgress),
            "COMPLETED" => Some(BookingStatus::Completed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// The complete edge table of the booking state machine.
    ///
    /// `Scheduled -> Completed` is taken only by the expiry sweep for
    /// bookings nobody joined.
    pub fn can_transition_to(&self, to: BookingStatus) -> bool {
        use BookingStatus::*;

        match (self, to) {
            (Scheduled, InProgress) => true,
            (Scheduled, Cancelled) => true,
            (Scheduled, Completed) => true,
            (InProgress, Completed) => true,

            // Terminal states have no outgoing edges
            (Completed, _) | (Cancelled, _) => false,

            _ => false,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reserved interval between a client and a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub client_id: String,
    pub provider_id: String,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.starts_at + Duration::minutes(self.duration_minutes)
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.starts_at, self.ends_at())
    }

    pub fn window(&self, early_join: Duration) -> AdmissionWindow {
        AdmissionWindow::with_buffer(self.starts_at, self.duration_minutes, early_join)
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.provider_id == user_id
    }

    /// Role derived from identity comparison; never taken from the caller.
    pub fn role_of(&self, user_id: &str) -> Option<ParticipantRole> {
        if self.provider_id == user_id {
            Some(ParticipantRole::Provider)
        } else if self.client_id == user_id {
            Some(ParticipantRole::Client)
        } else {
            None
        }
    }
}

/// Call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Scheduled,
    InProgress,
    Completed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Scheduled => "SCHEDULED",
            CallStatus::InProgress => "IN_PROGRESS",
            CallStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(CallStatus::Scheduled),
            "IN_PROGRESS" => Some(CallStatus::InProgress),
            "COMPLETED" => Some(CallStatus::Completed),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, CallStatus::Completed)
    }
}

/// One live session instance tied to a booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub booking_id: String,
    pub channel_name: String,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: i64,
}

impl Call {
    /// New open call for a booking, channel derived from the booking id
    pub fn open_for(booking_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            booking_id: booking_id.to_string(),
            channel_name: channel_name_for(booking_id),
            status: CallStatus::InProgress,
            started_at: now,
            ended_at: None,
            duration_secs: 0,
        }
    }
}

/// Transport channel name for a booking
pub fn channel_name_for(booking_id: &str) -> String {
    format!("consult-{}", booking_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Client,
    Provider,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Client => "CLIENT",
            ParticipantRole::Provider => "PROVIDER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CLIENT" => Some(ParticipantRole::Client),
            "PROVIDER" => Some(ParticipantRole::Provider),
            _ => None,
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One identity's presence record within a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParticipant {
    pub id: String,
    pub call_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_share_enabled: bool,
    pub network_quality: Option<i64>,
    pub duration_secs: Option<i64>,
    pub device_label: Option<String>,
}

impl CallParticipant {
    pub fn is_present(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Device state reported by a participant when joining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default = "enabled")]
    pub audio_enabled: bool,
    #[serde(default = "enabled")]
    pub video_enabled: bool,
    #[serde(default)]
    pub label: Option<String>,
}

fn enabled() -> bool {
    true
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            label: None,
        }
    }
}

/// Per-participant toggle that can be changed during a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSetting {
    Audio,
    Video,
    ScreenShare,
}

impl CallSetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallSetting::Audio => "audio",
            CallSetting::Video => "video",
            CallSetting::ScreenShare => "screen_share",
        }
    }

    /// Parse a setting name, rejecting anything outside the known three
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "audio" => Ok(CallSetting::Audio),
            "video" => Ok(CallSetting::Video),
            "screen_share" | "screenShare" => Ok(CallSetting::ScreenShare),
            other => Err(crate::Error::UnknownSetting(other.to_string())),
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        match self {
            CallSetting::Audio => "audio_enabled",
            CallSetting::Video => "video_enabled",
            CallSetting::ScreenShare => "screen_share_enabled",
        }
    }
}

/// Events a participant reports about an ongoing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    /// Re-announce presence on the open call, e.g. after a media reconnect
    Join {
        #[serde(default)]
        device: DeviceInfo,
    },
    Leave,
    Setting { setting: String, enabled: bool },
    NetworkQuality { score: i64 },
}

/// Bookings of one user split by the side they are on
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingLists {
    pub as_client: Vec<Booking>,
    pub as_provider: Vec<Booking>,
}

/// Everything the presentation layer shows for one booking
#[derive(Debug, Clone, Serialize)]
pub struct BookingDetail {
    pub booking: Booking,
    pub ends_at: DateTime<Utc>,
    pub window: AdmissionWindow,
    pub phase: WindowPhase,
    pub viewer_role: ParticipantRole,
    pub can_join_now: bool,
    /// The open call, or the most recent completed one
    pub call: Option<Call>,
    pub participants: Vec<CallParticipant>,
}

/// Successful admission into a booking's call
#[derive(Debug, Clone, Serialize)]
pub struct JoinGrant {
    pub credential: String,
    pub channel_name: String,
    pub uid: u32,
    pub call_id: String,
    pub participant_id: String,
    pub role: ParticipantRole,
    pub expires_at: DateTime<Utc>,
}

/// A booking that is live now or about to start, for notification UIs
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub booking: Booking,
    pub phase: WindowPhase,
    pub viewer_role: ParticipantRole,
    pub open_call: Option<Call>,
    /// Minutes until the admission window opens, zero once open
    pub minutes_until_start: i64,
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub orphaned_calls_removed: usize,
}
