//! # Lifecycle Engine
//!
//! The query and command surface presentation collaborators talk to. It
//! wires the store, clock and media transport into the state machine, call
//! tracker and admission gate, and owns the per-provider creation locks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use consult_core::prelude::*;
//!
//! # async fn example() -> consult_core::Result<()> {
//! let store = Arc::new(SqliteLifecycleStore::new("sqlite://consult.db?mode=rwc").await?);
//! let transport = Arc::new(HmacTokenIssuer::new("media-secret")?);
//! let engine = LifecycleEngine::builder()
//!     .with_store(store)
//!     .with_transport(transport)
//!     .build()?;
//!
//! let booking = engine
//!     .create_booking("client-1", "provider-1", Utc::now() + Duration::hours(2), 30)
//!     .await?;
//! let lists = engine.list_bookings_for("client-1").await?;
//! assert_eq!(lists.as_client[0].id, booking.id);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use crate::admission::AdmissionGate;
use crate::booking::BookingStateMachine;
use crate::call::CallSessionTracker;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::conflict::{SlotCheck, SlotConflictChecker};
use crate::events::{EventBus, EventStream, SessionEvent, SessionEventKind};
use crate::locks::KeyedLocks;
use crate::store::LifecycleStore;
use crate::transport::MediaTransport;
use crate::types::{
    ActiveSession, Booking, BookingDetail, BookingLists, BookingStatus, CallEvent, CallSetting,
    DeviceInfo, JoinGrant, SweepReport,
};
use crate::window::WindowPhase;
use crate::{Error, Result};

#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<dyn LifecycleStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    events: EventBus,
    bookings: BookingStateMachine,
    calls: CallSessionTracker,
    gate: AdmissionGate,
    conflicts: SlotConflictChecker,
    provider_locks: KeyedLocks,
}

#[derive(Default)]
pub struct LifecycleEngineBuilder {
    store: Option<Arc<dyn LifecycleStore>>,
    transport: Option<Arc<dyn MediaTransport>>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl LifecycleEngineBuilder {
    pub fn with_store(mut self, store: Arc<dyn LifecycleStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MediaTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<LifecycleEngine> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| Error::config("lifecycle engine needs a store"))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::config("lifecycle engine needs a media transport"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let config = self.config;

        let events = EventBus::new(config.event_buffer);
        let bookings =
            BookingStateMachine::new(store.clone(), events.clone(), config.sweep_safety_margin());
        let calls = CallSessionTracker::new(
            store.clone(),
            events.clone(),
            bookings.clone(),
            config.orphan_call_grace(),
        );
        let gate = AdmissionGate::new(
            bookings.clone(),
            calls.clone(),
            transport,
            clock.clone(),
            config.clone(),
        );

        Ok(LifecycleEngine {
            conflicts: SlotConflictChecker::new(store.clone()),
            store,
            clock,
            config,
            events,
            bookings,
            calls,
            gate,
            provider_locks: KeyedLocks::new("provider"),
        })
    }
}

impl LifecycleEngine {
    pub fn builder() -> LifecycleEngineBuilder {
        LifecycleEngineBuilder::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LifecycleStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn validate_request(
        &self,
        client_id: &str,
        provider_id: &str,
        starts_at: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<()> {
        if client_id.trim().is_empty() || provider_id.trim().is_empty() {
            return Err(Error::validation("client and provider ids are required"));
        }
        if client_id == provider_id {
            return Err(Error::validation("a client cannot book themself"));
        }
        self.validate_duration(duration_minutes)?;
        if starts_at <= self.now() {
            return Err(Error::validation("start must be in the future"));
        }
        Ok(())
    }

    fn validate_duration(&self, duration_minutes: i64) -> Result<()> {
        if duration_minutes < self.config.min_duration_minutes
            || duration_minutes > self.config.max_duration_minutes
        {
            return Err(Error::validation(format!(
                "duration must be between {} and {} minutes, got {}",
                self.config.min_duration_minutes, self.config.max_duration_minutes, duration_minutes
            )));
        }
        Ok(())
    }

    /// Reserve a slot. Fails with `SlotTaken` if any non-cancelled booking
    /// of the provider overlaps it.
    pub async fn create_booking(
        &self,
        client_id: &str,
        provider_id: &str,
        starts_at: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Booking> {
        self.validate_request(client_id, provider_id, starts_at, duration_minutes)?;

        let _guard = self.provider_locks.lock(provider_id).await;
        let now = self.now();
        let booking = Booking {
            id: Booking::new_id(),
            client_id: client_id.to_string(),
            provider_id: provider_id.to_string(),
            starts_at,
            duration_minutes,
            status: BookingStatus::Scheduled,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_booking_if_free(&booking).await? {
            SlotCheck::Available => {
                info!(
                    "📅 Booking {} created: {} with {} at {} for {} min",
                    booking.id, client_id, provider_id, starts_at, duration_minutes
                );
                self.events.publish(SessionEvent::for_booking(
                    &booking,
                    now,
                    SessionEventKind::BookingCreated {
                        starts_at,
                        duration_minutes,
                    },
                ));
                Ok(booking)
            }
            SlotCheck::Conflict { booking_id } => {
                debug!("Slot for {} at {} conflicts with {}", provider_id, starts_at, booking_id);
                Err(Error::SlotTaken {
                    conflicting_booking_id: booking_id,
                })
            }
        }
    }

    /// Advisory availability check; creation re-checks atomically
    pub async fn check_slot(
        &self,
        provider_id: &str,
        starts_at: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<SlotCheck> {
        self.validate_duration(duration_minutes)?;
        self.conflicts.check(provider_id, starts_at, duration_minutes).await
    }

    pub async fn cancel_booking(&self, booking_id: &str, actor_id: &str) -> Result<Booking> {
        self.bookings.cancel(booking_id, actor_id, self.now()).await
    }

    /// Bookings of a user split by side. Stale SCHEDULED bookings seen here
    /// are completed before returning.
    pub async fn list_bookings_for(&self, user_id: &str) -> Result<BookingLists> {
        let now = self.now();
        let mut lists = self.fetch_lists(user_id).await?;

        let stale: Vec<Booking> = lists
            .as_client
            .iter()
            .chain(lists.as_provider.iter())
            .filter(|b| self.bookings.is_stale(b, now))
            .cloned()
            .collect();

        if !stale.is_empty() {
            debug!("Listing for {} found {} stale bookings", user_id, stale.len());
            let report = self.bookings.complete_stale(&stale, now).await;
            if !report.completed.is_empty() || !report.skipped.is_empty() {
                lists = self.fetch_lists(user_id).await?;
            }
        }
        Ok(lists)
    }

    async fn fetch_lists(&self, user_id: &str) -> Result<BookingLists> {
        Ok(BookingLists {
            as_client: self.store.list_bookings_as_client(user_id).await?,
            as_provider: self.store.list_bookings_as_provider(user_id).await?,
        })
    }

    pub async fn get_booking_detail(&self, booking_id: &str, actor_id: &str) -> Result<BookingDetail> {
        let booking = self.bookings.load(booking_id).await?;
        let viewer_role = booking.role_of(actor_id).ok_or(Error::Forbidden)?;

        let now = self.now();
        let window = booking.window(self.config.early_join_buffer());
        let can_join_now = self.gate.check(&booking, actor_id).is_ok();

        let call = match self.store.find_open_call(booking_id).await? {
            Some(call) => Some(call),
            None => self.store.latest_call(booking_id).await?,
        };
        let participants = match &call {
            Some(call) => self.calls.participants(&call.id).await?,
            None => Vec::new(),
        };

        Ok(BookingDetail {
            ends_at: booking.ends_at(),
            phase: window.phase(now),
            window,
            viewer_role,
            can_join_now,
            call,
            participants,
            booking,
        })
    }

    pub async fn request_join(
        &self,
        booking_id: &str,
        actor_id: &str,
        device: &DeviceInfo,
    ) -> Result<JoinGrant> {
        self.gate.request_join(booking_id, actor_id, device).await
    }

    /// Apply a participant-reported call event. `Join` goes back through
    /// the admission gate and yields a fresh grant.
    pub async fn record_call_event(
        &self,
        booking_id: &str,
        actor_id: &str,
        event: CallEvent,
    ) -> Result<Option<JoinGrant>> {
        if let CallEvent::Join { device } = &event {
            return self.request_join(booking_id, actor_id, device).await.map(Some);
        }

        let booking = self.bookings.load(booking_id).await?;
        if !booking.is_party(actor_id) {
            return Err(Error::Forbidden);
        }
        if let CallEvent::Setting { setting, .. } = &event {
            CallSetting::parse(setting)?;
        }

        let _guard = self.calls.lock_booking(booking_id).await;
        let Some(call) = self.calls.open_call(booking_id).await? else {
            debug!("No open call for booking {}, ignoring event from {}", booking_id, actor_id);
            return Ok(None);
        };
        let now = self.now();

        match event {
            CallEvent::Leave => {
                self.calls.record_leave(&booking, &call.id, actor_id, now).await?;
            }
            CallEvent::Setting { setting, enabled } => {
                self.calls
                    .record_setting(&booking, &call.id, actor_id, &setting, enabled, now)
                    .await?;
            }
            CallEvent::NetworkQuality { score } => {
                self.calls.record_network_quality(&call.id, actor_id, score).await?;
            }
            CallEvent::Join { .. } => {}
        }
        Ok(None)
    }

    /// Complete expired SCHEDULED bookings and remove orphaned empty calls
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = self.bookings.sweep_expired(now).await?;

        match self.calls.close_orphaned_calls(now).await {
            Ok(removed) => report.orphaned_calls_removed = removed,
            Err(e) => error!("❌ Orphaned call cleanup failed: {}", e),
        }
        self.provider_locks.prune();
        Ok(report)
    }

    /// Non-terminal bookings live now or whose window opens within `lookahead`
    pub async fn active_sessions_for(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Result<Vec<ActiveSession>> {
        let lists = self.fetch_lists(user_id).await?;
        let mut sessions = Vec::new();

        for booking in lists.as_client.into_iter().chain(lists.as_provider) {
            if booking.status.is_terminal() {
                continue;
            }
            let window = booking.window(self.config.early_join_buffer());
            let phase = window.phase(now);
            match phase {
                WindowPhase::Ended => continue,
                WindowPhase::BeforeWindow if window.early_join > now + lookahead => continue,
                _ => {}
            }
            let Some(viewer_role) = booking.role_of(user_id) else {
                continue;
            };

            sessions.push(ActiveSession {
                open_call: self.store.find_open_call(&booking.id).await?,
                minutes_until_start: window.minutes_until_open(now),
                phase,
                viewer_role,
                booking,
            });
        }

        sessions.sort_by_key(|s| s.booking.starts_at);
        Ok(sessions)
    }

    pub fn subscribe(&self, user_id: &str) -> EventStream {
        self.events.subscribe(user_id)
    }
}
