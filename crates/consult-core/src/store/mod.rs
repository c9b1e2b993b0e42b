//! Persistence interface for bookings, calls and call participants
//!
//! The engine is written against [`LifecycleStore`]; [`SqliteLifecycleStore`]
//! is the bundled implementation. Implementations must provide:
//!
//! - an overlap query indexed by provider and time range,
//! - booking insertion that re-checks the slot in the same transaction,
//! - compare-and-set status updates (`WHERE status = from`),
//! - an atomic get-or-create for the single open call of a booking.

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conflict::SlotCheck;
use crate::types::{
    Booking, BookingStatus, Call, CallParticipant, CallSetting, DeviceInfo, ParticipantRole,
};
use crate::Result;

pub use sqlite::SqliteLifecycleStore;

#[async_trait]
pub trait LifecycleStore: Send + Sync {
    /// Insert `booking` unless a non-cancelled booking of the same provider
    /// overlaps it. The check, insert and re-check share one transaction.
    async fn insert_booking_if_free(&self, booking: &Booking) -> Result<SlotCheck>;
    async fn get_booking(&self, id: &str) -> Result<Option<Booking>>;
    /// Non-cancelled bookings of `provider_id` intersecting `[start, end)`
    async fn find_overlapping(
        &self,
        provider_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Booking>>;
    async fn list_bookings_as_client(&self, user_id: &str) -> Result<Vec<Booking>>;
    async fn list_bookings_as_provider(&self, user_id: &str) -> Result<Vec<Booking>>;
    /// Move a booking from `from` to `to`; false if it was no longer in `from`
    async fn transition_booking(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    /// SCHEDULED bookings whose end instant is before `ended_before`
    async fn list_stale_scheduled(&self, ended_before: DateTime<Utc>) -> Result<Vec<Booking>>;

    /// Return the booking's open call, inserting `candidate` if there is none.
    /// The flag is true when `candidate` was inserted.
    async fn get_or_create_open_call(&self, candidate: &Call) -> Result<(Call, bool)>;
    async fn get_call(&self, id: &str) -> Result<Option<Call>>;
    async fn find_open_call(&self, booking_id: &str) -> Result<Option<Call>>;
    async fn latest_call(&self, booking_id: &str) -> Result<Option<Call>>;
    async fn complete_call(
        &self,
        call_id: &str,
        ended_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<bool>;
    /// Delete a call that never had a participant
    async fn delete_call_if_empty(&self, call_id: &str) -> Result<bool>;
    /// Open calls without any participant row, started before the cutoff
    async fn list_empty_open_calls(&self, started_before: DateTime<Utc>) -> Result<Vec<Call>>;

    async fn upsert_participant_join(
        &self,
        call_id: &str,
        user_id: &str,
        role: ParticipantRole,
        device: &DeviceInfo,
        now: DateTime<Utc>,
    ) -> Result<CallParticipant>;
    /// Close the caller's present row; `None` if they were not present
    async fn mark_participant_left(
        &self,
        call_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CallParticipant>>;
    async fn count_present_participants(&self, call_id: &str) -> Result<i64>;
    async fn update_participant_setting(
        &self,
        call_id: &str,
        user_id: &str,
        setting: CallSetting,
        enabled: bool,
    ) -> Result<bool>;
    async fn update_network_quality(&self, call_id: &str, user_id: &str, score: i64) -> Result<bool>;
    async fn list_participants(&self, call_id: &str) -> Result<Vec<CallParticipant>>;
}
