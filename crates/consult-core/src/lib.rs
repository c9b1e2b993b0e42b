//! # Consult-Core
//!
//! Booking-to-session lifecycle engine for one-to-one consultations.
//!
//! A client books a fixed-length slot with a provider and later joins a
//! live call during a validated window. This crate decides:
//! - whether a requested slot is free
//! - whether a participant may join right now
//! - how a booking's status advances as time passes
//! - how concurrent join and leave events become one consistent call record
//!
//! ## Architecture
//!
//! [`LifecycleEngine`] is the entry point. It is built on a
//! [`LifecycleStore`] (SQLite bundled), a [`MediaTransport`] that mints
//! channel credentials and a [`Clock`]. Identity resolution lives behind
//! [`IdentityProvider`] and is applied by the caller before any engine call.

pub mod admission;
pub mod booking;
pub mod call;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod locks;
pub mod notify;
pub mod store;
pub mod transport;
pub mod types;
pub mod window;

use std::sync::Arc;

pub use admission::AdmissionGate;
pub use booking::BookingStateMachine;
pub use call::CallSessionTracker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoreConfig, EngineConfig};
pub use conflict::{check_slot, Interval, SlotCheck, SlotConflictChecker};
pub use engine::{LifecycleEngine, LifecycleEngineBuilder};
pub use error::{Error, Result};
pub use events::{EventBus, EventStream, SessionEvent, SessionEventKind};
pub use identity::{Identity, IdentityProvider, JwtConfig, JwtIdentityProvider};
pub use notify::DismissedSet;
pub use store::{LifecycleStore, SqliteLifecycleStore};
pub use transport::{HmacTokenIssuer, MediaTransport};
pub use types::*;
pub use window::{admission_window, AdmissionWindow, WindowPhase, EARLY_JOIN_BUFFER_MINUTES};

/// Commonly used items
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::EngineConfig;
    pub use crate::engine::LifecycleEngine;
    pub use crate::error::{Error, Result};
    pub use crate::identity::{Identity, IdentityProvider, JwtIdentityProvider};
    pub use crate::store::{LifecycleStore, SqliteLifecycleStore};
    pub use crate::transport::{HmacTokenIssuer, MediaTransport};
    pub use crate::types::{
        Booking, BookingStatus, CallEvent, DeviceInfo, JoinGrant, ParticipantRole,
    };
}

/// A ready-to-use engine plus the identity provider that guards it
#[derive(Clone)]
pub struct CoreServices {
    pub engine: LifecycleEngine,
    pub identity: Arc<JwtIdentityProvider>,
}

/// Open the store and wire the engine from configuration
pub async fn init(config: CoreConfig) -> Result<CoreServices> {
    config.validate()?;

    let store = Arc::new(SqliteLifecycleStore::new(&config.database_url).await?);
    let mut transport = HmacTokenIssuer::new(config.media_secret.as_bytes())?;
    if let Some(app_id) = config.media_app_id {
        transport = transport.with_app_id(app_id);
    }
    let transport = Arc::new(transport);
    let identity = Arc::new(JwtIdentityProvider::new(config.jwt)?);

    let engine = LifecycleEngine::builder()
        .with_store(store)
        .with_transport(transport)
        .with_config(config.engine)
        .build()?;

    Ok(CoreServices { engine, identity })
}
