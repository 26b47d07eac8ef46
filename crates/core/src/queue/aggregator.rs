//! Pending-work counter for observers

use std::sync::Arc;

use offsync_domain::{OperationStatus, Result};
use tokio::sync::watch;
use tracing::debug;

use super::ports::OperationStore;

/// Publishes the number of operations still awaiting sync.
///
/// The count is `pending + failed`; abandoned operations are reported
/// separately through [`PendingAggregator::abandoned_count`].
pub struct PendingAggregator {
    store: Arc<dyn OperationStore>,
    sender: watch::Sender<u64>,
}

impl PendingAggregator {
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        let (sender, _) = watch::channel(0);
        Self { store, sender }
    }

    /// Current outstanding count, read straight from the store.
    pub async fn count(&self) -> Result<u64> {
        let mut total = 0u64;
        for status in OperationStatus::OUTSTANDING {
            total = total.saturating_add(self.store.count(status).await?);
        }
        Ok(total)
    }

    /// Recompute the count and publish it to subscribers.
    pub async fn refresh(&self) -> Result<u64> {
        let count = self.count().await?;
        let changed = self.sender.send_if_modified(|current| {
            if *current == count {
                return false;
            }
            *current = count;
            true
        });
        if changed {
            debug!(pending = count, "pending count changed");
        }
        Ok(count)
    }

    /// Last published count, without touching the store.
    pub fn latest(&self) -> u64 {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.sender.subscribe()
    }

    /// Operations that exhausted their retry budget.
    pub async fn abandoned_count(&self) -> Result<u64> {
        self.store.count(OperationStatus::Abandoned).await
    }
}
