//! Port interfaces for the durable operation queue

use async_trait::async_trait;
use offsync_domain::{FailureRecord, NewOperation, OperationStatus, QueuedOperation, Result};

/// Durable, ordered storage of queued operations.
///
/// Every method resolves only after its effect is durable. Listing methods
/// return records in ascending `enqueued_at` order, ties broken by insertion
/// order.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Persist a new `pending` record, assigning its id and enqueue time.
    async fn append(&self, operation: NewOperation) -> Result<QueuedOperation>;

    /// Fetch a single record.
    async fn get(&self, id: &str) -> Result<Option<QueuedOperation>>;

    /// Records in `statuses`, merged into one FIFO sequence.
    async fn list_by_statuses(&self, statuses: &[OperationStatus]) -> Result<Vec<QueuedOperation>>;

    /// Records with the given status, oldest first.
    async fn list_by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>> {
        self.list_by_statuses(&[status]).await
    }

    /// Atomically set a record's status.
    ///
    /// Transitioning into `failed` also increments `retries`. Returns
    /// `QueueError::NotFound` when the record no longer exists.
    async fn set_status(&self, id: &str, status: OperationStatus) -> Result<()>;

    /// Atomically record a failed attempt: status, `retries + 1`, reason and
    /// next attempt time. Returns the updated record.
    async fn record_failure(&self, id: &str, failure: &FailureRecord) -> Result<QueuedOperation>;

    /// Delete a record. Removing an absent id is not an error.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Number of records with the given status.
    async fn count(&self, status: OperationStatus) -> Result<u64>;

    /// Reset records stranded in `syncing` back to `pending`.
    async fn recover_interrupted(&self) -> Result<u64>;
}

/// Receives "work was enqueued" signals.
///
/// Implementations must not block; the enqueuer fires this after the durable
/// write and returns immediately.
pub trait SyncTrigger: Send + Sync {
    fn notify_enqueued(&self);
}
