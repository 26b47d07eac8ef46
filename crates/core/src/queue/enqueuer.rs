//! Accepting caller mutations into the durable queue

use std::sync::Arc;

use offsync_domain::{NewOperation, OperationRequest, Result};
use tracing::{debug, info, warn};

use super::aggregator::PendingAggregator;
use super::ports::{OperationStore, SyncTrigger};

/// Validates caller intent and appends it to the store.
///
/// `enqueue` resolves as soon as the record is durable. Follow-up work
/// (refreshing the pending count, nudging the scheduler) never turns a
/// successful write into an error.
pub struct OperationEnqueuer {
    store: Arc<dyn OperationStore>,
    aggregator: Option<Arc<PendingAggregator>>,
    trigger: Option<Arc<dyn SyncTrigger>>,
}

impl OperationEnqueuer {
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        Self { store, aggregator: None, trigger: None }
    }

    pub fn with_aggregator(mut self, aggregator: Arc<PendingAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn SyncTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Record a mutation for later replay and return its id.
    ///
    /// # Errors
    /// - `QueueError::Validation` if the request is malformed; nothing is written
    /// - `QueueError::Storage` if the durable write fails
    pub async fn enqueue(&self, request: OperationRequest) -> Result<String> {
        let operation = NewOperation::try_from(request).inspect_err(|err| {
            debug!(error = %err, "rejected operation request");
        })?;

        let record = self.store.append(operation).await?;
        info!(
            operation_id = %record.id,
            op_type = %record.op_type,
            collection = %record.collection,
            document_id = record.document_id.as_deref().unwrap_or(""),
            "operation enqueued"
        );

        if let Some(aggregator) = &self.aggregator {
            if let Err(err) = aggregator.refresh().await {
                warn!(error = %err, "failed to refresh pending count after enqueue");
            }
        }

        if let Some(trigger) = &self.trigger {
            trigger.notify_enqueued();
        }

        Ok(record.id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use offsync_domain::{OperationStatus, OperationType, QueueError};
    use serde_json::json;

    use super::*;
    use crate::testing::InMemoryOperationStore;

    #[derive(Default)]
    struct CountingTrigger {
        hits: AtomicUsize,
    }

    impl SyncTrigger for CountingTrigger {
        fn notify_enqueued(&self) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn enqueue_persists_pending_record() {
        let store = Arc::new(InMemoryOperationStore::new());
        let enqueuer = OperationEnqueuer::new(store.clone());

        let id = enqueuer
            .enqueue(OperationRequest::create("trabalhos", Some("t1".into()), json!({ "tonelagem": 10 })))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Pending);
        assert_eq!(record.op_type, OperationType::Create);
        assert_eq!(record.data, Some(json!({ "tonelagem": 10 })));
        assert_eq!(record.retries, 0);
    }

    #[tokio::test]
    async fn validation_failure_writes_nothing_and_skips_trigger() {
        let store = Arc::new(InMemoryOperationStore::new());
        let trigger = Arc::new(CountingTrigger::default());
        let enqueuer = OperationEnqueuer::new(store.clone()).with_trigger(trigger.clone());

        let err = enqueuer
            .enqueue(OperationRequest::new(OperationType::Update, "trabalhos", None, Some(json!({}))))
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Validation(_)));
        assert!(store.is_empty());
        assert_eq!(trigger.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced() {
        let store = Arc::new(InMemoryOperationStore::new());
        store.fail_writes(true);
        let enqueuer = OperationEnqueuer::new(store);

        let err = enqueuer.enqueue(OperationRequest::delete("trabalhos", "t2")).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn successful_enqueue_refreshes_count_and_notifies() {
        let store = Arc::new(InMemoryOperationStore::new());
        let aggregator = Arc::new(PendingAggregator::new(store.clone()));
        let trigger = Arc::new(CountingTrigger::default());
        let enqueuer = OperationEnqueuer::new(store)
            .with_aggregator(aggregator.clone())
            .with_trigger(trigger.clone());

        enqueuer.enqueue(OperationRequest::delete("trabalhos", "t2")).await.unwrap();
        enqueuer.enqueue(OperationRequest::delete("trabalhos", "t3")).await.unwrap();

        assert_eq!(aggregator.latest(), 2);
        assert_eq!(trigger.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ids_are_unique_and_order_is_preserved() {
        let store = Arc::new(InMemoryOperationStore::new());
        let enqueuer = OperationEnqueuer::new(store.clone());

        let mut ids = Vec::new();
        for doc in ["a", "b", "c", "d"] {
            ids.push(enqueuer.enqueue(OperationRequest::delete("trabalhos", doc)).await.unwrap());
        }

        let listed: Vec<String> = store
            .list_by_status(OperationStatus::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(listed, ids);

        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
