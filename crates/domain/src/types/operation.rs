//! Queued operation model
//!
//! A [`QueuedOperation`] is the unit of deferred work: one create, update or
//! delete against a remote collection. Callers describe their intent with an
//! [`OperationRequest`]; validation turns it into a [`NewOperation`], the only
//! shape a store accepts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_ERROR_LENGTH;
use crate::errors::{QueueError, Result};

/// Kind of mutation carried by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

crate::impl_domain_status_conversions!(OperationType {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

impl OperationType {
    /// HTTP verb used to replay this operation.
    pub const fn http_method(&self) -> &'static str {
        match self {
            Self::Create => "POST",
            Self::Update => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Update and delete address an existing document.
    pub const fn requires_document_id(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }

    pub const fn carries_payload(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

/// Lifecycle status of a queued operation
///
/// `pending → syncing → {completed (removed) | failed}`; failed operations are
/// re-attempted on later passes until they succeed or exhaust the retry
/// budget and become `abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
    Abandoned,
}

crate::impl_domain_status_conversions!(OperationStatus {
    Pending => "pending",
    Syncing => "syncing",
    Completed => "completed",
    Failed => "failed",
    Abandoned => "abandoned",
});

impl OperationStatus {
    /// Statuses selected by a drain pass.
    pub const DRAINABLE: [Self; 2] = [Self::Pending, Self::Failed];

    /// Statuses that keep later operations on the same document waiting.
    pub const ORDER_BLOCKING: [Self; 3] = [Self::Pending, Self::Failed, Self::Abandoned];

    /// Statuses that count as outstanding work for observers.
    pub const OUTSTANDING: [Self; 2] = [Self::Pending, Self::Failed];
}

/// Mutation intent as issued by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub op_type: OperationType,
    pub collection: String,
    pub document_id: Option<String>,
    pub data: Option<Value>,
}

impl OperationRequest {
    pub fn new(
        op_type: OperationType,
        collection: impl Into<String>,
        document_id: Option<String>,
        data: Option<Value>,
    ) -> Self {
        Self { op_type, collection: collection.into(), document_id, data }
    }

    /// Build a request from an untyped operation name such as `"update"`.
    ///
    /// # Errors
    /// Returns `QueueError::Validation` for unknown operation types.
    pub fn parse(
        op_type: &str,
        collection: impl Into<String>,
        document_id: Option<String>,
        data: Option<Value>,
    ) -> Result<Self> {
        let op_type = op_type.parse::<OperationType>().map_err(QueueError::Validation)?;
        Ok(Self::new(op_type, collection, document_id, data))
    }

    pub fn create(collection: impl Into<String>, document_id: Option<String>, data: Value) -> Self {
        Self::new(OperationType::Create, collection, document_id, Some(data))
    }

    pub fn update(collection: impl Into<String>, document_id: impl Into<String>, data: Value) -> Self {
        Self::new(OperationType::Update, collection, Some(document_id.into()), Some(data))
    }

    pub fn delete(collection: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self::new(OperationType::Delete, collection, Some(document_id.into()), None)
    }

    /// Check the request against the queue's acceptance rules.
    ///
    /// # Errors
    /// Returns `QueueError::Validation` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        validate_collection(&self.collection)?;

        match self.document_id.as_deref() {
            Some(id) => validate_document_id(id)?,
            None if self.op_type.requires_document_id() => {
                return Err(QueueError::Validation(format!(
                    "documentId is required for {} operations",
                    self.op_type
                )));
            }
            None => {}
        }

        if !self.op_type.carries_payload() && self.data.is_some() {
            return Err(QueueError::Validation(format!(
                "{} operations do not carry a payload",
                self.op_type
            )));
        }

        Ok(())
    }
}

/// Validated operation ready to be appended to a store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    op_type: OperationType,
    collection: String,
    document_id: Option<String>,
    data: Option<Value>,
}

impl NewOperation {
    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Materialise the stored record for this operation.
    pub fn into_queued(self, id: String, enqueued_at: i64) -> QueuedOperation {
        QueuedOperation {
            id,
            op_type: self.op_type,
            collection: self.collection,
            document_id: self.document_id,
            data: self.data,
            enqueued_at,
            retries: 0,
            status: OperationStatus::Pending,
            last_error: None,
            next_attempt_at: None,
            updated_at: enqueued_at,
        }
    }
}

impl TryFrom<OperationRequest> for NewOperation {
    type Error = QueueError;

    fn try_from(request: OperationRequest) -> Result<Self> {
        request.validate()?;
        let OperationRequest { op_type, collection, document_id, data } = request;
        Ok(Self { op_type, collection, document_id, data })
    }
}

/// Durable record of a deferred mutation.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub collection: String,
    pub document_id: Option<String>,
    pub data: Option<Value>,
    pub enqueued_at: i64,
    pub retries: u32,
    pub status: OperationStatus,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<i64>,
    pub updated_at: i64,
}

impl QueuedOperation {
    /// `(collection, documentId)` pair used to keep per-document ordering.
    pub fn document_key(&self) -> Option<(&str, &str)> {
        self.document_id.as_deref().map(|doc| (self.collection.as_str(), doc))
    }

    /// Key the remote side can use to recognise a replayed operation.
    ///
    /// Creates without a document id fall back to the operation id, which is
    /// stable across retries.
    pub fn idempotency_key(&self) -> String {
        let target = self.document_id.as_deref().unwrap_or(&self.id);
        format!("{}:{}/{}", self.op_type, self.collection, target)
    }

    /// Path below the API prefix: `{collection}` for creates,
    /// `{collection}/{documentId}` otherwise.
    pub fn remote_path(&self) -> String {
        match (self.op_type, self.document_id.as_deref()) {
            (OperationType::Create, _) | (_, None) => self.collection.clone(),
            (_, Some(doc)) => format!("{}/{}", self.collection, doc),
        }
    }

    /// Whether the backoff window (if any) has elapsed at `now_ms`.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now_ms)
    }
}

/// Outcome of a failed attempt, persisted atomically with the retry counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub error: String,
    pub next_attempt_at: Option<i64>,
    /// Move the operation to `abandoned` instead of `failed`.
    pub abandon: bool,
}

impl FailureRecord {
    pub fn new(error: impl AsRef<str>, next_attempt_at: Option<i64>, abandon: bool) -> Self {
        Self { error: truncate_reason(error.as_ref()), next_attempt_at, abandon }
    }

    /// Status the operation ends up in.
    pub fn status(&self) -> OperationStatus {
        if self.abandon {
            OperationStatus::Abandoned
        } else {
            OperationStatus::Failed
        }
    }
}

fn validate_collection(collection: &str) -> Result<()> {
    if collection.trim().is_empty() {
        return Err(QueueError::Validation("collection must not be empty".into()));
    }
    if collection.chars().any(char::is_whitespace) {
        return Err(QueueError::Validation(format!(
            "collection must not contain whitespace: {collection:?}"
        )));
    }
    if collection.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(QueueError::Validation(format!(
            "collection must be a relative path without empty or '..' segments: {collection:?}"
        )));
    }
    Ok(())
}

fn validate_document_id(document_id: &str) -> Result<()> {
    if document_id.trim().is_empty() {
        return Err(QueueError::Validation("documentId must not be empty".into()));
    }
    if document_id.contains('/') {
        return Err(QueueError::Validation(format!(
            "documentId must not contain '/': {document_id:?}"
        )));
    }
    Ok(())
}

fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_ERROR_LENGTH {
        return reason.to_string();
    }

    let mut truncated =
        reason.chars().take(MAX_ERROR_LENGTH.saturating_sub(3)).collect::<String>();
    truncated.push_str("...");
    truncated
}
