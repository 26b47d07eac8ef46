//! Error types used throughout the queue
//!
//! `QueueError` is the structural error surfaced to direct callers (enqueue,
//! store access, configuration). `SyncError` describes a single failed attempt
//! to apply an operation remotely; it is recorded on the operation and never
//! escapes a drain pass.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for offsync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum QueueError {
    /// Malformed operation request, rejected before anything is written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable store unavailable, closed or corrupt.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A referenced record no longer exists in the store.
    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// True for every error originating in the durable store, including
    /// vanished records.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::NotFound(_))
    }

    /// True when the referenced record was already removed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Stable label suitable for logging fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::NotFound(_) => "not_found",
            Self::Sync(_) => "sync",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<SyncError> for QueueError {
    fn from(err: SyncError) -> Self {
        Self::Sync(err.to_string())
    }
}

/// Result type alias for offsync operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// Categories of sync errors, used for logging and backoff hints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Authentication errors (401, 403)
    Authentication,
    /// Rate limiting errors (429)
    RateLimit,
    /// Server errors (5xx)
    Server,
    /// Client errors (4xx except auth and rate limit)
    Client,
    /// Network/connection errors and timeouts
    Network,
    /// Misconfiguration or cancellation on our side
    Config,
}

/// Failure to apply one operation against the remote API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status}: {message}")),
            429 => Self::RateLimit(format!("HTTP {status}: {message}")),
            500..=599 => Self::Server { status, message },
            _ => Self::Client { status, message },
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> SyncErrorCategory {
        match self {
            Self::Auth(_) => SyncErrorCategory::Authentication,
            Self::RateLimit(_) => SyncErrorCategory::RateLimit,
            Self::Server { .. } => SyncErrorCategory::Server,
            Self::Client { .. } => SyncErrorCategory::Client,
            Self::Network(_) | Self::Timeout(_) => SyncErrorCategory::Network,
            Self::Config(_) | Self::Cancelled => SyncErrorCategory::Config,
        }
    }

    /// Whether a later attempt has a realistic chance of succeeding.
    ///
    /// Every failure is still retried by the executor; this only feeds logs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            SyncErrorCategory::Authentication
                | SyncErrorCategory::RateLimit
                | SyncErrorCategory::Server
                | SyncErrorCategory::Network
        )
    }

    /// Stable label suitable for logging fields.
    pub fn label(&self) -> &'static str {
        match self.category() {
            SyncErrorCategory::Authentication => "auth",
            SyncErrorCategory::RateLimit => "rate_limit",
            SyncErrorCategory::Server => "server",
            SyncErrorCategory::Client => "client",
            SyncErrorCategory::Network => "network",
            SyncErrorCategory::Config => "config",
        }
    }
}
