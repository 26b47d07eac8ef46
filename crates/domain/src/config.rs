//! Configuration management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_API_PREFIX, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_SECS,
    DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_DB_PATH, DEFAULT_DB_POOL_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_RECONNECT_DEBOUNCE_MS,
    DEFAULT_SYNC_INTERVAL_SECS, DEFAULT_TRANSPORT_ATTEMPTS,
};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub connectivity: ConnectivityConfig,
    pub logging: LoggingConfig,
}

/// Durable queue store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

/// Remote data API configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_prefix: String,
    /// Coarse "reconcile now" endpoint invoked after a pass that synced work.
    pub reconcile_path: Option<String>,
    pub request_timeout_secs: u64,
    /// Transport-level attempts per call (connect failures and 5xx).
    pub transport_attempts: u32,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
}

/// Sync scheduling and retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub reconnect_debounce_ms: u64,
    pub call_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

/// Connectivity detection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// URL probed to detect network presence; probing is disabled when unset.
    pub probe_url: Option<String>,
    pub probe_interval_secs: u64,
    pub probe_timeout_ms: u64,
    /// Initial state before the first probe or manual update.
    pub assume_online: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: DEFAULT_DB_PATH.to_string(), pool_size: DEFAULT_DB_POOL_SIZE }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            reconcile_path: None,
            request_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            transport_attempts: DEFAULT_TRANSPORT_ATTEMPTS,
            auth_token: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: DEFAULT_SYNC_INTERVAL_SECS,
            reconnect_debounce_ms: DEFAULT_RECONNECT_DEBOUNCE_MS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            max_retries: Some(DEFAULT_MAX_RETRIES),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            assume_online: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ConnectivityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
