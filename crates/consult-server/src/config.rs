//! Server configuration
//!
//! Layered as built-in defaults, then an optional TOML file, then
//! `CONSULT__`-prefixed environment variables. Nested keys use `__`, e.g.
//! `CONSULT__ENGINE__EARLY_JOIN_BUFFER_MINUTES=10`.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use consult_core::{CoreConfig, EngineConfig, JwtConfig};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "CONSULT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub database_url: String,
    pub log_level: String,
    pub json_logs: bool,
    /// Seconds between background sweeps
    pub sweep_interval_secs: u64,
    pub jwt: JwtConfig,
    pub media: MediaConfig,
    pub engine: EngineConfig,
}

/// Media relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub app_id: Option<String>,
    pub signing_secret: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            signing_secret: "change-me-media-secret".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            database_url: "sqlite://consult.db?mode=rwc".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            sweep_interval_secs: 60,
            jwt: JwtConfig::default(),
            media: MediaConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load defaults, then `path` if it exists, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&ServerConfig::default()).context("failed to encode defaults")?,
        );
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: ServerConfig = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.sweep_interval_secs == 0 {
            return Err(anyhow!("sweep_interval_secs must be positive"));
        }
        self.to_core_config()
            .validate()
            .map_err(|e| anyhow!("{}", e))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address
            .parse()
            .with_context(|| format!("invalid bind address '{}'", self.bind_address))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn to_core_config(&self) -> CoreConfig {
        CoreConfig {
            database_url: self.database_url.clone(),
            engine: self.engine.clone(),
            jwt: self.jwt.clone(),
            media_secret: self.media.signing_secret.clone(),
            media_app_id: self.media.app_id.clone(),
        }
    }
}
