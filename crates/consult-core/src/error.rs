use thiserror::Error;

use crate::transport::TransportError;
use crate::types::BookingStatus;

/// Errors produced by the lifecycle engine
///
/// Variants fall into the groups the presentation layer cares about:
/// validation, conflict, authorization, temporal, dependency and internal.
/// Temporal errors (`TooEarly`, `CallEnded`, `NotJoinable`) are expected
/// traffic and are never logged as failures.
///
/// # Examples
///
/// ```
/// use consult_core::{Error, Result};
///
/// fn join() -> Result<()> {
///     Err(Error::TooEarly { minutes_until_start: 3 })
/// }
///
/// match join() {
///     Err(e) if e.is_temporal() => println!("come back later: {}", e),
///     Err(e) => println!("failed: {}", e),
///     Ok(()) => {}
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input such as an out-of-range duration
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider already has a non-cancelled booking overlapping the slot
    #[error("Slot taken (conflicts with booking {conflicting_booking_id})")]
    SlotTaken { conflicting_booking_id: String },

    /// Caller is not a party to the resource
    #[error("Forbidden")]
    Forbidden,

    /// Caller may not perform this action on the booking
    #[error("Unauthorized")]
    Unauthorized,

    /// Credential could not be resolved to a user
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    /// The admission window has not opened yet
    #[error("Too early to join, window opens in {minutes_until_start} minute(s)")]
    TooEarly { minutes_until_start: i64 },

    #[error("Call has ended")]
    CallEnded,

    #[error("Booking is not joinable (status {status})")]
    NotJoinable { status: BookingStatus },

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    /// Media transport could not issue a credential
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new NotFound error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Rejections caused only by the clock or booking status
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            Error::TooEarly { .. } | Error::CallEnded | Error::NotJoinable { .. }
        )
    }

    /// Conditions the caller may retry, possibly with different input
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::SlotTaken { .. } | Error::ServiceUnavailable(_))
    }
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, Error>;
