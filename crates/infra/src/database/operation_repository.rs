//! SQLite-backed implementation of the operation store port.
//!
//! Every call runs on the blocking pool and commits before resolving.
//! Listing orders by `enqueued_at` then `rowid`, so operations enqueued in
//! the same millisecond keep their insertion order.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use offsync_core::OperationStore;
use offsync_domain::{
    FailureRecord, NewOperation, OperationStatus, QueueError, QueuedOperation, Result,
};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use tokio::task;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::manager::{map_sql_error, DbManager};
use crate::errors::InfraError;

/// Durable queue store persisted in a single SQLite file.
pub struct SqliteOperationStore {
    db: Arc<DbManager>,
}

impl SqliteOperationStore {
    /// Wrap an already migrated database.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Open the queue file, apply the schema and reset operations left in
    /// `syncing` by an earlier process.
    #[instrument(skip(path), fields(db_path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, pool_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = task::spawn_blocking(move || -> Result<DbManager> {
            let db = DbManager::new(&path, pool_size)?;
            db.run_migrations()?;
            Ok(db)
        })
        .await
        .map_err(map_join_error)??;

        let store = Self::new(Arc::new(db));
        let recovered = store.recover_interrupted().await?;
        if recovered > 0 {
            warn!(recovered, "recovered operations interrupted mid-sync");
        }
        info!("operation store opened");
        Ok(store)
    }

    /// Release the connection pool; later calls fail with a storage error.
    pub fn close(&self) {
        self.db.close();
    }

    pub fn is_open(&self) -> bool {
        self.db.is_open()
    }

    pub fn db(&self) -> &Arc<DbManager> {
        &self.db
    }

    /// Put an abandoned (or failed) operation back in line with a fresh
    /// retry budget.
    pub async fn requeue(&self, id: &str) -> Result<QueuedOperation> {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(map_sql_error)?;
            let changed = tx
                .execute(REQUEUE_SQL, params![Utc::now().timestamp_millis(), id])
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(QueueError::NotFound(id));
            }
            let record = fetch_one(&tx, &id)?.ok_or_else(|| QueueError::NotFound(id.clone()))?;
            tx.commit().map_err(map_sql_error)?;
            Ok(record)
        })
        .await
    }

    /// Permanently drop an operation. Unlike `remove`, a missing id is an error.
    pub async fn purge(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(DELETE_SQL, params![id]).map_err(map_sql_error)?;
            if changed == 0 {
                return Err(QueueError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<T> {
            let mut conn = db.get_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl OperationStore for SqliteOperationStore {
    async fn append(&self, operation: NewOperation) -> Result<QueuedOperation> {
        self.run(move |conn| insert_operation(conn, operation)).await
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedOperation>> {
        let id = id.to_string();
        self.run(move |conn| fetch_one(conn, &id)).await
    }

    async fn list_by_statuses(&self, statuses: &[OperationStatus]) -> Result<Vec<QueuedOperation>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let statuses: Vec<&'static str> = statuses.iter().map(OperationStatus::as_str).collect();
        self.run(move |conn| {
            let placeholders = vec!["?"; statuses.len()].join(", ");
            let sql = format!(
                "SELECT {OPERATION_COLUMNS} FROM operation_queue
                 WHERE status IN ({placeholders})
                 ORDER BY enqueued_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params_from_iter(statuses.iter()), map_operation_row)
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
    }

    async fn set_status(&self, id: &str, status: OperationStatus) -> Result<()> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn
                .execute(
                    SET_STATUS_SQL,
                    params![status.as_str(), Utc::now().timestamp_millis(), id],
                )
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(QueueError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn record_failure(&self, id: &str, failure: &FailureRecord) -> Result<QueuedOperation> {
        let id = id.to_string();
        let failure = failure.clone();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(map_sql_error)?;
            let changed = tx
                .execute(
                    RECORD_FAILURE_SQL,
                    params![
                        failure.status().as_str(),
                        failure.error,
                        failure.next_attempt_at,
                        Utc::now().timestamp_millis(),
                        id
                    ],
                )
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(QueueError::NotFound(id));
            }
            let record = fetch_one(&tx, &id)?.ok_or_else(|| QueueError::NotFound(id.clone()))?;
            tx.commit().map_err(map_sql_error)?;
            Ok(record)
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.execute(DELETE_SQL, params![id]).map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn count(&self, status: OperationStatus) -> Result<u64> {
        self.run(move |conn| {
            let count: i64 = conn
                .query_row(COUNT_SQL, params![status.as_str()], |row| row.get(0))
                .map_err(map_sql_error)?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }

    async fn recover_interrupted(&self) -> Result<u64> {
        self.run(|conn| {
            let changed = conn
                .execute(RECOVER_SQL, params![Utc::now().timestamp_millis()])
                .map_err(map_sql_error)?;
            Ok(changed as u64)
        })
        .await
    }
}

/// Insert inside an immediate transaction so the `MAX(enqueued_at)` read and
/// the write cannot interleave with another appender.
fn insert_operation(conn: &mut Connection, operation: NewOperation) -> Result<QueuedOperation> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(map_sql_error)?;

    let latest: Option<i64> = tx
        .query_row("SELECT MAX(enqueued_at) FROM operation_queue", [], |row| row.get(0))
        .map_err(map_sql_error)?;
    let enqueued_at = Utc::now().timestamp_millis().max(latest.unwrap_or(i64::MIN));

    let record = operation.into_queued(Uuid::now_v7().to_string(), enqueued_at);
    let data = record
        .data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| QueueError::from(InfraError::from(err)))?;

    tx.execute(
        INSERT_SQL,
        params![
            record.id,
            record.op_type.as_str(),
            record.collection,
            record.document_id,
            data,
            record.enqueued_at,
            record.retries,
            record.status.as_str(),
            record.updated_at,
        ],
    )
    .map_err(map_sql_error)?;
    tx.commit().map_err(map_sql_error)?;
    Ok(record)
}

fn fetch_one(conn: &Connection, id: &str) -> Result<Option<QueuedOperation>> {
    conn.query_row(&format!("SELECT {OPERATION_COLUMNS} FROM operation_queue WHERE id = ?1"), params![id], map_operation_row)
        .optional()
        .map_err(map_sql_error)
}

fn map_operation_row(row: &Row<'_>) -> rusqlite::Result<QueuedOperation> {
    let op_type: String = row.get(1)?;
    let data: Option<String> = row.get(4)?;
    let status: String = row.get(7)?;

    Ok(QueuedOperation {
        id: row.get(0)?,
        op_type: parse_column(1, &op_type)?,
        collection: row.get(2)?,
        document_id: row.get(3)?,
        data: data
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err)))?,
        enqueued_at: row.get(5)?,
        retries: row.get(6)?,
        status: parse_column(7, &status)?,
        last_error: row.get(8)?,
        next_attempt_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn parse_column<T>(index: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err.into()))
}

fn map_join_error(err: task::JoinError) -> QueueError {
    if err.is_cancelled() {
        QueueError::Internal("blocking store task cancelled".into())
    } else {
        QueueError::Internal(format!("blocking store task failed: {err}"))
    }
}

const OPERATION_COLUMNS: &str = "id, op_type, collection, document_id, data, enqueued_at, retries, \
     status, last_error, next_attempt_at, updated_at";

const INSERT_SQL: &str = "INSERT INTO operation_queue (
        id, op_type, collection, document_id, data, enqueued_at, retries, status, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const SET_STATUS_SQL: &str = "UPDATE operation_queue
    SET status = ?1,
        retries = retries + CASE WHEN ?1 = 'failed' THEN 1 ELSE 0 END,
        updated_at = ?2
    WHERE id = ?3";

const RECORD_FAILURE_SQL: &str = "UPDATE operation_queue
    SET status = ?1,
        retries = retries + 1,
        last_error = ?2,
        next_attempt_at = ?3,
        updated_at = ?4
    WHERE id = ?5";

const REQUEUE_SQL: &str = "UPDATE operation_queue
    SET status = 'pending',
        retries = 0,
        next_attempt_at = NULL,
        updated_at = ?1
    WHERE id = ?2 AND status IN ('failed', 'abandoned')";

const RECOVER_SQL: &str =
    "UPDATE operation_queue SET status = 'pending', updated_at = ?1 WHERE status = 'syncing'";

const DELETE_SQL: &str = "DELETE FROM operation_queue WHERE id = ?1";

const COUNT_SQL: &str = "SELECT COUNT(*) FROM operation_queue WHERE status = ?1";

#[cfg(test)]
mod tests {
    use offsync_domain::{OperationRequest, OperationType};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    async fn setup_store() -> (SqliteOperationStore, TempDir) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let store = SqliteOperationStore::open(temp_dir.path().join("queue.db"), 2)
            .await
            .expect("store opened");
        (store, temp_dir)
    }

    fn new_op(request: OperationRequest) -> NewOperation {
        NewOperation::try_from(request).expect("valid request")
    }

    #[tokio::test]
    async fn append_assigns_id_and_pending_status() {
        let (store, _dir) = setup_store().await;

        let record = store
            .append(new_op(OperationRequest::create(
                "trabalhos",
                Some("t1".into()),
                json!({ "tonelagem": 10 }),
            )))
            .await
            .unwrap();

        assert!(Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.status, OperationStatus::Pending);
        assert_eq!(store.get(&record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn reopening_preserves_pending_records_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.db");

        let ids = {
            let store = SqliteOperationStore::open(&path, 2).await.unwrap();
            let mut ids = Vec::new();
            for doc in ["a", "b", "c"] {
                let record = store
                    .append(new_op(OperationRequest::update("trabalhos", doc, json!({ "doc": doc }))))
                    .await
                    .unwrap();
                ids.push(record.id);
            }
            store.close();
            ids
        };

        let reopened = SqliteOperationStore::open(&path, 2).await.unwrap();
        let pending = reopened.list_by_status(OperationStatus::Pending).await.unwrap();
        let listed: Vec<_> = pending.iter().map(|op| op.id.clone()).collect();
        assert_eq!(listed, ids);
        assert_eq!(pending[1].data, Some(json!({ "doc": "b" })));
        assert_eq!(pending[1].op_type, OperationType::Update);
    }

    #[tokio::test]
    async fn same_millisecond_appends_keep_insertion_order() {
        let (store, _dir) = setup_store().await;
        let mut ids = Vec::new();
        for i in 0..50 {
            let record = store
                .append(new_op(OperationRequest::delete("trabalhos", format!("t{i}"))))
                .await
                .unwrap();
            ids.push(record.id);
        }

        let listed = store.list_by_status(OperationStatus::Pending).await.unwrap();
        assert!(listed.windows(2).all(|pair| pair[0].enqueued_at <= pair[1].enqueued_at));
        assert_eq!(listed.into_iter().map(|op| op.id).collect::<Vec<_>>(), ids);
    }

    #[tokio::test]
    async fn merged_listing_interleaves_statuses_by_age() {
        let (store, _dir) = setup_store().await;
        let first = store.append(new_op(OperationRequest::delete("trabalhos", "a"))).await.unwrap();
        let second = store.append(new_op(OperationRequest::delete("trabalhos", "b"))).await.unwrap();
        store.set_status(&first.id, OperationStatus::Failed).await.unwrap();

        let listed = store.list_by_statuses(&OperationStatus::DRAINABLE).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
        assert!(store.list_by_statuses(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_status_failed_increments_retries() {
        let (store, _dir) = setup_store().await;
        let record = store.append(new_op(OperationRequest::delete("trabalhos", "t2"))).await.unwrap();

        store.set_status(&record.id, OperationStatus::Syncing).await.unwrap();
        store.set_status(&record.id, OperationStatus::Failed).await.unwrap();

        let updated = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(updated.status, OperationStatus::Failed);
        assert_eq!(updated.retries, 1);
        assert_eq!(store.count(OperationStatus::Failed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_status_on_missing_record_is_not_found() {
        let (store, _dir) = setup_store().await;
        let err = store.set_status("missing", OperationStatus::Syncing).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn record_failure_persists_reason_and_backoff() {
        let (store, _dir) = setup_store().await;
        let record = store.append(new_op(OperationRequest::delete("trabalhos", "t2"))).await.unwrap();

        let updated = store
            .record_failure(&record.id, &FailureRecord::new("HTTP 500", Some(42), false))
            .await
            .unwrap();
        assert_eq!(updated.status, OperationStatus::Failed);
        assert_eq!(updated.retries, 1);
        assert_eq!(updated.last_error.as_deref(), Some("HTTP 500"));
        assert_eq!(updated.next_attempt_at, Some(42));

        let abandoned = store
            .record_failure(&record.id, &FailureRecord::new("HTTP 500", None, true))
            .await
            .unwrap();
        assert_eq!(abandoned.status, OperationStatus::Abandoned);
        assert_eq!(abandoned.retries, 2);

        let err = store
            .record_failure("missing", &FailureRecord::new("x", None, false))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (store, _dir) = setup_store().await;
        let record = store.append(new_op(OperationRequest::delete("trabalhos", "t2"))).await.unwrap();

        store.remove(&record.id).await.unwrap();
        store.remove(&record.id).await.unwrap();
        assert!(store.get(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_recovers_interrupted_operations() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.db");

        let id = {
            let store = SqliteOperationStore::open(&path, 1).await.unwrap();
            let record =
                store.append(new_op(OperationRequest::delete("trabalhos", "t2"))).await.unwrap();
            store.set_status(&record.id, OperationStatus::Syncing).await.unwrap();
            store.close();
            record.id
        };

        let reopened = SqliteOperationStore::open(&path, 1).await.unwrap();
        let record = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Pending);
        assert_eq!(reopened.count(OperationStatus::Syncing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let (store, _dir) = setup_store().await;
        store.close();

        let err = store.append(new_op(OperationRequest::delete("trabalhos", "t2"))).await.unwrap_err();
        assert_eq!(err, QueueError::Storage("store closed".into()));
        assert!(store.count(OperationStatus::Pending).await.unwrap_err().is_storage());
    }

    #[tokio::test]
    async fn requeue_resets_dead_letter() {
        let (store, _dir) = setup_store().await;
        let record = store.append(new_op(OperationRequest::delete("trabalhos", "t2"))).await.unwrap();
        store.record_failure(&record.id, &FailureRecord::new("gone", None, true)).await.unwrap();

        let requeued = store.requeue(&record.id).await.unwrap();
        assert_eq!(requeued.status, OperationStatus::Pending);
        assert_eq!(requeued.retries, 0);
        assert_eq!(requeued.next_attempt_at, None);

        // Pending operations are not requeueable.
        assert!(store.requeue(&record.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn purge_requires_existing_record() {
        let (store, _dir) = setup_store().await;
        let record = store.append(new_op(OperationRequest::delete("trabalhos", "t2"))).await.unwrap();

        store.purge(&record.id).await.unwrap();
        assert!(store.purge(&record.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_persisted() {
        let (store, _dir) = setup_store().await;
        let store = Arc::new(store);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .append(new_op(OperationRequest::delete("trabalhos", format!("t{i}"))))
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert_eq!(store.count(OperationStatus::Pending).await.unwrap(), 20);
    }
}
