//! Configuration for consult-core

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::identity::JwtConfig;
use crate::window::EARLY_JOIN_BUFFER_MINUTES;
use crate::{Error, Result};

/// Lifecycle engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minutes before the start at which joining opens
    pub early_join_buffer_minutes: i64,
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    /// Slack past the booking end before the sweep completes it
    pub sweep_safety_margin_secs: i64,
    /// Age after which a call nobody ever joined is removed
    pub orphan_call_grace_secs: i64,
    pub credential_ttl_secs: i64,
    pub transport_timeout_secs: u64,
    /// Extra attempts after the first credential request fails
    pub transport_retries: u32,
    /// Capacity of the lifecycle event channel
    pub event_buffer: usize,
    /// How long a dismissed notification stays hidden
    pub dismissed_ttl_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            early_join_buffer_minutes: EARLY_JOIN_BUFFER_MINUTES,
            min_duration_minutes: 15,
            max_duration_minutes: 180,
            sweep_safety_margin_secs: 60,
            orphan_call_grace_secs: 120,
            credential_ttl_secs: 3600,
            transport_timeout_secs: 10,
            transport_retries: 1,
            event_buffer: 256,
            dismissed_ttl_secs: 24 * 3600,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.early_join_buffer_minutes < 0 {
            return Err(Error::config("early_join_buffer_minutes must not be negative"));
        }
        if self.min_duration_minutes <= 0 || self.max_duration_minutes < self.min_duration_minutes {
            return Err(Error::config(format!(
                "invalid duration bounds {}..={}",
                self.min_duration_minutes, self.max_duration_minutes
            )));
        }
        if self.sweep_safety_margin_secs < 0 || self.orphan_call_grace_secs < 0 {
            return Err(Error::config("sweep margins must not be negative"));
        }
        if self.credential_ttl_secs <= 0 {
            return Err(Error::config("credential_ttl_secs must be positive"));
        }
        if self.transport_timeout_secs == 0 {
            return Err(Error::config("transport_timeout_secs must be positive"));
        }
        if self.dismissed_ttl_secs <= 0 {
            return Err(Error::config("dismissed_ttl_secs must be positive"));
        }
        if self.transport_retries > 1 {
            return Err(Error::config(format!(
                "transport_retries must be 0 or 1, got {}",
                self.transport_retries
            )));
        }
        if self.event_buffer == 0 {
            return Err(Error::config("event_buffer must be positive"));
        }
        Ok(())
    }

    pub fn early_join_buffer(&self) -> Duration {
        Duration::minutes(self.early_join_buffer_minutes)
    }

    pub fn sweep_safety_margin(&self) -> Duration {
        Duration::seconds(self.sweep_safety_margin_secs)
    }

    pub fn orphan_call_grace(&self) -> Duration {
        Duration::seconds(self.orphan_call_grace_secs)
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::seconds(self.credential_ttl_secs)
    }

    pub fn transport_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.transport_timeout_secs)
    }

    pub fn dismissed_ttl(&self) -> Duration {
        Duration::seconds(self.dismissed_ttl_secs)
    }
}

/// Everything needed to stand up a store-backed engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_url: String,
    pub engine: EngineConfig,
    pub jwt: JwtConfig,
    /// Secret for signing media credentials
    pub media_secret: String,
    /// Application id embedded in media credentials, if the relay wants one
    pub media_app_id: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://consult.db?mode=rwc".to_string(),
            engine: EngineConfig::default(),
            jwt: JwtConfig::default(),
            media_secret: "change-me-media-secret".to_string(),
            media_app_id: None,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.jwt.secret.len() < 16 {
            return Err(Error::config("jwt secret must be at least 16 bytes"));
        }
        if self.media_secret.is_empty() {
            return Err(Error::config("media_secret must not be empty"));
        }
        Ok(())
    }
}
