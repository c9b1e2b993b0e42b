//! Shared fixtures for consult-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use consult_core::transport::{CredentialRequest, MediaCredential, TransportError};
use consult_core::{
    Booking, EngineConfig, LifecycleEngine, ManualClock, MediaTransport, SqliteLifecycleStore,
};
use tempfile::TempDir;

pub const CLIENT: &str = "client-ana";
pub const PROVIDER: &str = "provider-ben";
pub const STRANGER: &str = "stranger-cy";

/// Monday 2026-03-02 09:00 UTC, the clock's starting point
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// `hh:mm` on the base day
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

/// Transport double with programmable failures
#[derive(Default)]
pub struct FakeTransport {
    transient_failures: AtomicU32,
    reject: AtomicBool,
    calls: AtomicU32,
}

impl FakeTransport {
    pub fn fail_next(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn reject_all(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn issue_credential(
        &self,
        request: &CredentialRequest,
    ) -> Result<MediaCredential, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("channel quota exceeded".to_string()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Transient("relay unreachable".to_string()));
        }
        Ok(MediaCredential {
            token: format!("tok-{}-{}", request.channel_name, request.uid),
            expires_at: request.expires_at,
        })
    }
}

pub struct TestEnv {
    pub engine: LifecycleEngine,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<FakeTransport>,
    pub store: Arc<SqliteLifecycleStore>,
    _temp_dir: TempDir,
}

impl TestEnv {
    /// Book `CLIENT` with `PROVIDER`
    pub async fn book(&self, start: DateTime<Utc>, minutes: i64) -> Booking {
        self.engine
            .create_booking(CLIENT, PROVIDER, start, minutes)
            .await
            .expect("booking should be created")
    }

    pub fn set_time(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Engine over a fresh SQLite file in a temp dir, clock at `base_time()`
pub async fn create_test_env() -> TestEnv {
    create_test_env_with(EngineConfig::default()).await
}

pub async fn create_test_env_with(config: EngineConfig) -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let store = Arc::new(
        SqliteLifecycleStore::new(&db_url)
            .await
            .expect("Failed to create test database"),
    );
    let clock = Arc::new(ManualClock::new(base_time()));
    let transport = Arc::new(FakeTransport::default());

    let engine = LifecycleEngine::builder()
        .with_store(store.clone())
        .with_transport(transport.clone())
        .with_clock(clock.clone())
        .with_config(config)
        .build()
        .expect("engine should build");

    TestEnv {
        engine,
        clock,
        transport,
        store,
        _temp_dir: temp_dir,
    }
}
