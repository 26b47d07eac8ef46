//! In-memory test doubles for the queue ports
//!
//! Available to this crate's tests and, behind the `test-utils` feature, to
//! downstream crates:
//! - [`InMemoryOperationStore`]: non-durable `OperationStore` with failure injection
//! - [`ScriptedRemote`]: `RemoteApi` that records calls and replays scripted outcomes

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use offsync_domain::{
    FailureRecord, NewOperation, OperationStatus, QueueError, QueuedOperation, Result, SyncError,
};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::queue::ports::OperationStore;
use crate::sync::ports::RemoteApi;

#[derive(Default)]
struct StoreState {
    records: Vec<QueuedOperation>,
    last_enqueued_at: i64,
    fail_writes: bool,
}

/// `OperationStore` backed by a vector in insertion order.
#[derive(Default)]
pub struct InMemoryOperationStore {
    state: Mutex<StoreState>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `QueueError::Storage`.
    pub fn fail_writes(&self, enabled: bool) {
        self.state.lock().fail_writes = enabled;
    }

    /// All records, in insertion order.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.state.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a stored record, e.g. to simulate a stranded `syncing` row.
    pub fn put(&self, operation: QueuedOperation) {
        let mut state = self.state.lock();
        match state.records.iter_mut().find(|existing| existing.id == operation.id) {
            Some(existing) => *existing = operation,
            None => state.records.push(operation),
        }
    }

    fn write_guard(state: &StoreState) -> Result<()> {
        if state.fail_writes {
            return Err(QueueError::Storage("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn append(&self, operation: NewOperation) -> Result<QueuedOperation> {
        let mut state = self.state.lock();
        Self::write_guard(&state)?;

        let enqueued_at = Utc::now().timestamp_millis().max(state.last_enqueued_at);
        state.last_enqueued_at = enqueued_at;

        let record = operation.into_queued(Uuid::now_v7().to_string(), enqueued_at);
        state.records.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedOperation>> {
        Ok(self.state.lock().records.iter().find(|op| op.id == id).cloned())
    }

    async fn list_by_statuses(&self, statuses: &[OperationStatus]) -> Result<Vec<QueuedOperation>> {
        let mut matching: Vec<QueuedOperation> = self
            .state
            .lock()
            .records
            .iter()
            .filter(|op| statuses.contains(&op.status))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        matching.sort_by_key(|op| op.enqueued_at);
        Ok(matching)
    }

    async fn set_status(&self, id: &str, status: OperationStatus) -> Result<()> {
        let mut state = self.state.lock();
        Self::write_guard(&state)?;

        let record = state
            .records
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if status == OperationStatus::Failed {
            record.retries = record.retries.saturating_add(1);
        }
        record.status = status;
        record.updated_at = Utc::now().timestamp_millis();
        Ok(())
    }

    async fn record_failure(&self, id: &str, failure: &FailureRecord) -> Result<QueuedOperation> {
        let mut state = self.state.lock();
        Self::write_guard(&state)?;

        let record = state
            .records
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        record.status = failure.status();
        record.retries = record.retries.saturating_add(1);
        record.last_error = Some(failure.error.clone());
        record.next_attempt_at = failure.next_attempt_at;
        record.updated_at = Utc::now().timestamp_millis();
        Ok(record.clone())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::write_guard(&state)?;
        state.records.retain(|op| op.id != id);
        Ok(())
    }

    async fn count(&self, status: OperationStatus) -> Result<u64> {
        let count = self.state.lock().records.iter().filter(|op| op.status == status).count();
        Ok(count as u64)
    }

    async fn recover_interrupted(&self) -> Result<u64> {
        let mut state = self.state.lock();
        Self::write_guard(&state)?;

        let mut recovered = 0;
        for record in state.records.iter_mut().filter(|op| op.status == OperationStatus::Syncing) {
            record.status = OperationStatus::Pending;
            recovered += 1;
        }
        Ok(recovered)
    }
}

/// One remote call observed by [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub method: &'static str,
    pub path: String,
    pub operation_id: String,
    pub body: Option<Value>,
}

/// `RemoteApi` that records every call and answers from a script.
///
/// Resolution order for each call: a per-document failure registered with
/// [`ScriptedRemote::fail_document`], then the next queued response, then
/// success.
#[derive(Default)]
pub struct ScriptedRemote {
    calls: Mutex<Vec<RemoteCall>>,
    events: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<std::result::Result<(), SyncError>>>,
    failing_documents: Mutex<HashMap<String, SyncError>>,
    reconcile_failure: Mutex<Option<SyncError>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    reconcile_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue outcomes consumed by the next calls, in order.
    pub fn with_responses(self, responses: Vec<std::result::Result<(), SyncError>>) -> Self {
        self.responses.lock().extend(responses);
        self
    }

    /// Fail every call targeting `document_id` until [`Self::heal_document`].
    pub fn fail_document(&self, document_id: &str, error: SyncError) {
        self.failing_documents.lock().insert(document_id.to_string(), error);
    }

    pub fn heal_document(&self, document_id: &str) {
        self.failing_documents.lock().remove(document_id);
    }

    pub fn fail_reconcile(&self, error: SyncError) {
        *self.reconcile_failure.lock() = Some(error);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// `"start:{id}"` / `"end:{id}"` markers in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of `apply` calls that were in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn reconcile_count(&self) -> usize {
        self.reconcile_calls.load(Ordering::SeqCst)
    }

    fn scripted_outcome(&self, operation: &QueuedOperation) -> std::result::Result<(), SyncError> {
        if let Some(doc) = operation.document_id.as_deref() {
            if let Some(error) = self.failing_documents.lock().get(doc) {
                return Err(error.clone());
            }
        }
        self.responses.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn apply(&self, operation: &QueuedOperation) -> std::result::Result<(), SyncError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.events.lock().push(format!("start:{}", operation.id));
        self.calls.lock().push(RemoteCall {
            method: operation.op_type.http_method(),
            path: operation.remote_path(),
            operation_id: operation.id.clone(),
            body: operation.data.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.scripted_outcome(operation);
        self.events.lock().push(format!("end:{}", operation.id));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn reconcile(&self) -> std::result::Result<(), SyncError> {
        self.reconcile_calls.fetch_add(1, Ordering::SeqCst);
        match self.reconcile_failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
