//! Conversions from external infrastructure errors into queue errors.

use offsync_domain::{QueueError, SyncError};
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub QueueError);

impl From<InfraError> for QueueError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<QueueError> for InfraError {
    fn from(value: QueueError) -> Self {
        InfraError(value)
    }
}

trait IntoQueueError {
    fn into_queue_error(self) -> QueueError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → QueueError */
/* -------------------------------------------------------------------------- */

impl IntoQueueError for SqlError {
    fn into_queue_error(self) -> QueueError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => QueueError::Storage("database is busy".into()),
                    (ErrorCode::DatabaseLocked, _) => {
                        QueueError::Storage("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 1555 | 2067) => {
                        QueueError::Storage("unique constraint violation".into())
                    }
                    (ErrorCode::DiskFull, _) => QueueError::Storage("disk is full".into()),
                    (ErrorCode::ReadOnly, _) => {
                        QueueError::Storage("database is read-only".into())
                    }
                    (ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt, _) => {
                        QueueError::Storage(format!("database file is unusable: {message}"))
                    }
                    _ => QueueError::Storage(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => QueueError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                QueueError::Storage(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                QueueError::Storage(format!("invalid column type for {name}: {ty}"))
            }
            RE::Utf8Error(_) => QueueError::Storage("invalid UTF-8 returned from sqlite".into()),
            RE::InvalidPath(path) => QueueError::Storage(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => QueueError::Storage(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_queue_error())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → QueueError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(QueueError::Storage(format!("connection pool error: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → QueueError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(QueueError::Storage(format!("invalid stored payload: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → SyncError */
/* -------------------------------------------------------------------------- */

/// Classify a transport-level failure for a single remote call.
pub(crate) fn sync_error_from_http(err: &HttpError) -> SyncError {
    if err.is_timeout() {
        return SyncError::Network("HTTP request timed out".into());
    }

    if err.is_connect() {
        return SyncError::Network(format!("HTTP connection failure: {err}"));
    }

    if let Some(status) = err.status() {
        return SyncError::from_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown status"),
        );
    }

    if err.is_builder() {
        return SyncError::Config(err.to_string());
    }

    SyncError::Network(err.to_string())
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(QueueError::Sync(sync_error_from_http(&value).to_string()))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use reqwest::{Client, StatusCode};
    use rusqlite::ffi::{Error as FfiError, ErrorCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn sqlite_busy_maps_to_storage_error() {
        let err = SqlError::SqliteFailure(
            FfiError { code: ErrorCode::DatabaseBusy, extended_code: 5 },
            Some("database is locked".into()),
        );

        let mapped: QueueError = InfraError::from(err).into();
        match mapped {
            QueueError::Storage(msg) => assert!(msg.contains("busy")),
            other => panic!("expected storage error, got {other:?}"),
        }
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let mapped: QueueError = InfraError::from(SqlError::QueryReturnedNoRows).into();
        assert!(mapped.is_not_found());
    }

    #[test]
    fn corrupt_payload_is_storage_class() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let mapped: QueueError = InfraError::from(err).into();
        assert!(mapped.is_storage());
    }

    #[tokio::test]
    async fn http_status_500_maps_to_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(StatusCode::INTERNAL_SERVER_ERROR))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client.get(server.uri()).send().await.unwrap().error_for_status().unwrap_err();

        match sync_error_from_http(&error) {
            SyncError::Server { status, .. } => assert_eq!(status, 500),
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_maps_to_network_error() {
        let client = Client::builder().no_proxy().build().unwrap();
        let error = client.get("http://127.0.0.1:1/").send().await.unwrap_err();

        assert!(matches!(sync_error_from_http(&error), SyncError::Network(_)));
    }
}
