//! Drain pass: replay outstanding operations against the remote API
//!
//! A pass snapshots every `pending` and `failed` operation in FIFO order and
//! processes them strictly one at a time. Remote failures are recorded on the
//! operation and never abort the pass; only structural store failures do.
//! Operations on a document whose earlier operation failed, was deferred or
//! is dead-lettered are deferred too, so per-document order survives retries.
//! A dead letter keeps its document held until it is requeued or purged.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use offsync_domain::{OperationStatus, QueueError, QueuedOperation, Result, SyncError, SyncSummary};
use tracing::{debug, info, instrument, warn};

use super::ports::RemoteApi;
use super::retry::RetryPolicy;
use crate::queue::aggregator::PendingAggregator;
use crate::queue::ports::OperationStore;

/// Per-operation outcome inside a pass.
enum Step {
    Synced,
    Failed { abandoned: bool },
    Deferred,
    Vanished,
}

pub struct SyncExecutor {
    store: Arc<dyn OperationStore>,
    remote: Arc<dyn RemoteApi>,
    policy: RetryPolicy,
    call_timeout: Duration,
    aggregator: Option<Arc<PendingAggregator>>,
}

impl SyncExecutor {
    pub fn new(
        store: Arc<dyn OperationStore>,
        remote: Arc<dyn RemoteApi>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self { store, remote, policy, call_timeout, aggregator: None }
    }

    pub fn with_aggregator(mut self, aggregator: Arc<PendingAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one drain pass.
    ///
    /// Callers must serialise passes; `SyncCoordinator` does this.
    ///
    /// # Errors
    /// Returns a storage-class `QueueError` if the store cannot be listed or
    /// written. Operations processed before the failure keep their outcome.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<SyncSummary> {
        let started = Instant::now();
        let outcome = self.run_pass().await;

        if let Some(aggregator) = &self.aggregator {
            if let Err(err) = aggregator.refresh().await {
                warn!(error = %err, "failed to refresh pending count after drain");
            }
        }

        match &outcome {
            Ok(summary) => info!(
                synced = summary.synced,
                failed = summary.failed,
                deferred = summary.deferred,
                abandoned = summary.abandoned,
                duration_ms = started.elapsed().as_millis() as u64,
                "drain pass finished"
            ),
            Err(err) => warn!(error = %err, "drain pass aborted"),
        }
        outcome
    }

    async fn run_pass(&self) -> Result<SyncSummary> {
        let recovered = self.store.recover_interrupted().await?;
        if recovered > 0 {
            warn!(recovered, "reset interrupted operations to pending");
        }

        let operations = self.store.list_by_statuses(&OperationStatus::ORDER_BLOCKING).await?;
        let mut summary = SyncSummary::default();
        if operations.iter().all(|op| op.status == OperationStatus::Abandoned) {
            debug!("nothing to drain");
            return Ok(summary);
        }
        debug!(count = operations.len(), "draining queued operations");

        let mut held: HashSet<(String, String)> = HashSet::new();
        for operation in &operations {
            if operation.status == OperationStatus::Abandoned {
                hold(&mut held, document_key(operation));
                continue;
            }
            match self.process(operation, &mut held).await? {
                Step::Synced => summary.synced += 1,
                Step::Failed { abandoned } => {
                    summary.failed += 1;
                    if abandoned {
                        summary.abandoned += 1;
                    }
                }
                Step::Deferred => summary.deferred += 1,
                Step::Vanished => {}
            }
        }

        if summary.synced > 0 {
            self.reconcile().await;
        }
        Ok(summary)
    }

    async fn process(
        &self,
        operation: &QueuedOperation,
        held: &mut HashSet<(String, String)>,
    ) -> Result<Step> {
        let key = document_key(operation);

        if key.as_ref().is_some_and(|key| held.contains(key)) {
            debug!(operation_id = %operation.id, "deferred behind earlier operation on the same document");
            return Ok(Step::Deferred);
        }

        let now_ms = Utc::now().timestamp_millis();
        if operation.status == OperationStatus::Failed && !operation.is_due(now_ms) {
            debug!(
                operation_id = %operation.id,
                next_attempt_at = operation.next_attempt_at,
                "deferred by backoff"
            );
            hold(held, key);
            return Ok(Step::Deferred);
        }

        if let Some(step) = vanished(self.store.set_status(&operation.id, OperationStatus::Syncing).await)? {
            return Ok(step);
        }

        match self.apply(operation).await {
            Ok(()) => {
                if let Some(step) = vanished(self.store.remove(&operation.id).await)? {
                    return Ok(step);
                }
                debug!(operation_id = %operation.id, "operation synced");
                Ok(Step::Synced)
            }
            Err(err) => {
                hold(held, key);
                let failure = self.policy.failure_for(operation, &err, Utc::now().timestamp_millis());
                let abandoned = failure.abandon;
                match self.store.record_failure(&operation.id, &failure).await {
                    Ok(updated) => {
                        warn!(
                            operation_id = %operation.id,
                            collection = %operation.collection,
                            error = %err,
                            category = err.label(),
                            retries = updated.retries,
                            abandoned,
                            "operation failed to sync"
                        );
                        Ok(Step::Failed { abandoned })
                    }
                    Err(err) if err.is_not_found() => Ok(Step::Vanished),
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn apply(&self, operation: &QueuedOperation) -> std::result::Result<(), SyncError> {
        match tokio::time::timeout(self.call_timeout, self.remote.apply(operation)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.call_timeout)),
        }
    }

    async fn reconcile(&self) {
        let result = match tokio::time::timeout(self.call_timeout, self.remote.reconcile()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.call_timeout)),
        };
        if let Err(err) = result {
            warn!(error = %err, "reconcile request failed");
        }
    }
}

fn document_key(operation: &QueuedOperation) -> Option<(String, String)> {
    operation.document_key().map(|(collection, doc)| (collection.to_string(), doc.to_string()))
}

fn hold(held: &mut HashSet<(String, String)>, key: Option<(String, String)>) {
    if let Some(key) = key {
        held.insert(key);
    }
}

/// `Some(Vanished)` if the record disappeared mid-pass, `None` on success.
fn vanished(result: Result<()>) -> Result<Option<Step>> {
    match result {
        Ok(()) => Ok(None),
        Err(QueueError::NotFound(id)) => {
            debug!(operation_id = %id, "operation removed during pass");
            Ok(Some(Step::Vanished))
        }
        Err(err) => Err(err),
    }
}
