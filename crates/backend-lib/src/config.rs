// ============================
// shopstatus-backend-lib/src/config.rs
// ============================
//! Configuration management.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::AppError;

/// Environment variable prefix, nested keys use `__` (e.g. `SHOPSTATUS_SERVER__PORT`)
pub const ENV_PREFIX: &str = "SHOPSTATUS_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub presence: PresenceSettings,
    pub broadcast: BroadcastSettings,
    pub log: LogSettings,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Liveness and presence timing, all in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceSettings {
    /// Interval at which clients are expected to send heartbeats
    pub heartbeat_interval_secs: u64,
    /// Connections without a heartbeat for longer than this are dropped
    pub stale_after_secs: u64,
    /// How often the stale sweep runs
    pub sweep_interval_secs: u64,
    /// Time a fresh connection gets to send its `auth` message
    pub auth_grace_secs: u64,
    /// Users with activity inside this window are reported as active
    pub active_window_secs: u64,
    /// How long a departed user's last-seen time is remembered
    pub last_seen_retention_secs: u64,
}

/// Per-connection delivery settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Outbound queue depth per connection; a full queue evicts the connection
    pub queue_capacity: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            stale_after_secs: 90, // 3 missed heartbeats
            sweep_interval_secs: 30,
            auth_grace_secs: 10,
            active_window_secs: 5 * 60,
            last_seen_retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            presence: PresenceSettings::default(),
            broadcast: BroadcastSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl PresenceSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn auth_grace(&self) -> Duration {
        Duration::from_secs(self.auth_grace_secs)
    }

    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    pub fn last_seen_retention(&self) -> Duration {
        Duration::from_secs(self.last_seen_retention_secs)
    }
}

impl Settings {
    /// Load settings from `config.toml` in the working directory and the environment
    pub fn load() -> Result<Self, AppError> {
        Self::load_from("config.toml")
    }

    /// Load settings from a specific TOML file (missing files are skipped) and the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Layered provider: defaults, then file, then `SHOPSTATUS_*` variables
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Socket address the server binds to
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid bind address: {e}")))
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        let p = &self.presence;
        if p.heartbeat_interval_secs == 0
            || p.sweep_interval_secs == 0
            || p.auth_grace_secs == 0
            || p.active_window_secs == 0
            || p.last_seen_retention_secs == 0
        {
            return Err(AppError::Config(
                "presence intervals must be greater than zero".to_string(),
            ));
        }
        if p.stale_after_secs <= p.heartbeat_interval_secs {
            return Err(AppError::Config(format!(
                "stale_after_secs ({}) must exceed heartbeat_interval_secs ({})",
                p.stale_after_secs, p.heartbeat_interval_secs
            )));
        }
        if self.broadcast.queue_capacity == 0 {
            return Err(AppError::Config(
                "broadcast.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "unknown log level: {}",
                self.log.level
            )));
        }
        Ok(())
    }
}
