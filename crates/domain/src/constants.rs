//! Queue constants
//!
//! Centralized defaults shared by the configuration layer and the services.

// Remote API
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const DEFAULT_TRANSPORT_ATTEMPTS: u32 = 2;
pub const DEFAULT_TRANSPORT_BACKOFF_MS: u64 = 200;

// Scheduling
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_RECONNECT_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

// Retry policy
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 900;
pub const DEFAULT_MAX_RETRIES: u32 = 10;

// Connectivity probing
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;

// Persistence
pub const DEFAULT_DB_PATH: &str = "offsync.db";
pub const DEFAULT_DB_POOL_SIZE: u32 = 4;
pub const MAX_ERROR_LENGTH: usize = 256;
