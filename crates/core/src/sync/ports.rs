//! Port interfaces for replaying operations remotely

use async_trait::async_trait;
use offsync_domain::{QueuedOperation, SyncError};

/// Remote data API consumed by the sync executor.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Apply one queued operation. Any non-success outcome is a `SyncError`.
    async fn apply(&self, operation: &QueuedOperation) -> Result<(), SyncError>;

    /// Coarse "a batch was applied, re-derive aggregates" signal.
    ///
    /// Best effort; the default does nothing.
    async fn reconcile(&self) -> Result<(), SyncError> {
        Ok(())
    }
}
