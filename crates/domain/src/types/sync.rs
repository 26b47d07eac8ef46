//! Sync pass results and scheduling signals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters produced by one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Operations applied remotely and removed from the queue.
    pub synced: u32,
    /// Operations whose remote call failed during this pass.
    pub failed: u32,
    /// Operations left untouched (backoff window or an earlier failure on
    /// the same document).
    pub deferred: u32,
    /// Subset of `failed` that exhausted the retry budget.
    pub abandoned: u32,
}

impl SyncSummary {
    /// Number of operations for which a remote call was attempted.
    pub fn attempted(&self) -> u32 {
        self.synced.saturating_add(self.failed)
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// What caused a drain pass to be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTriggerSource {
    Manual,
    Reconnect,
    Interval,
    Enqueue,
}

crate::impl_domain_status_conversions!(SyncTriggerSource {
    Manual => "manual",
    Reconnect => "reconnect",
    Interval => "interval",
    Enqueue => "enqueue",
});

/// Result of the most recent drain pass, kept for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub trigger: SyncTriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Present when the pass ran to completion.
    pub summary: Option<SyncSummary>,
    /// Structural failure that aborted the pass.
    pub error: Option<String>,
}

impl SyncReport {
    /// Failures visible to the user for the last pass ("last sync had N
    /// failures").
    pub fn failures(&self) -> u32 {
        self.summary.map_or(0, |summary| summary.failed)
    }
}

/// Outcome of asking for a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRequest {
    /// A new drain pass was started.
    Started,
    /// A pass is already in flight; the request was dropped.
    AlreadyRunning,
    /// Connectivity is down; nothing was started.
    Offline,
}

/// Edge transition reported by the connectivity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

impl ConnectivityEvent {
    /// Event emitted when the state changes to `online`.
    pub const fn for_state(online: bool) -> Self {
        if online {
            Self::BecameOnline
        } else {
            Self::BecameOffline
        }
    }
}
