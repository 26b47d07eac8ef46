//! REST adapter for the remote data API
//!
//! Maps each queued operation onto one request below the API prefix:
//! create → `POST {collection}`, update → `PUT {collection}/{documentId}`,
//! delete → `DELETE {collection}/{documentId}`. Any 2xx is success.

use async_trait::async_trait;
use offsync_core::RemoteApi;
use offsync_domain::constants::IDEMPOTENCY_HEADER;
use offsync_domain::{OperationType, QueueError, QueuedOperation, RemoteConfig, Result, SyncError};
use reqwest::{Method, Url};
use tracing::{debug, instrument};

use crate::http::HttpClient;

const MAX_ERROR_BODY: usize = 200;

pub struct HttpRemoteApi {
    http: HttpClient,
    api_root: Url,
    auth_token: Option<String>,
    reconcile_url: Option<Url>,
}

impl HttpRemoteApi {
    /// Build an adapter for `base_url` + `api_prefix`.
    ///
    /// # Errors
    /// Returns `QueueError::Config` when the URL cannot be parsed or cannot
    /// carry a path.
    pub fn new(http: HttpClient, base_url: &str, api_prefix: &str) -> Result<Self> {
        let mut api_root = Url::parse(base_url)
            .map_err(|err| QueueError::Config(format!("invalid remote base_url {base_url:?}: {err}")))?;
        {
            let mut segments = api_root.path_segments_mut().map_err(|()| {
                QueueError::Config(format!("remote base_url cannot be a base: {base_url:?}"))
            })?;
            segments.pop_if_empty();
            segments.extend(api_prefix.split('/').filter(|segment| !segment.is_empty()));
        }
        Ok(Self { http, api_root, auth_token: None, reconcile_url: None })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let http = HttpClient::new(config.request_timeout(), config.transport_attempts)?;

        let mut api = Self::new(http, &config.base_url, &config.api_prefix)?;
        if let Some(token) = config.auth_token.clone().filter(|token| !token.is_empty()) {
            api = api.with_auth_token(token);
        }
        if let Some(path) = config.reconcile_path.as_deref() {
            api = api.with_reconcile_path(&config.base_url, path)?;
        }
        Ok(api)
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Enable the post-pass reconcile request at `path` relative to `base_url`.
    pub fn with_reconcile_path(mut self, base_url: &str, path: &str) -> Result<Self> {
        let url = Url::parse(base_url)
            .and_then(|base| base.join(path))
            .map_err(|err| QueueError::Config(format!("invalid reconcile path {path:?}: {err}")))?;
        self.reconcile_url = Some(url);
        Ok(self)
    }

    /// Fully qualified URL an operation is sent to.
    pub fn operation_url(&self, operation: &QueuedOperation) -> Url {
        let mut url = self.api_root.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(operation.collection.split('/'));
            if operation.op_type != OperationType::Create {
                if let Some(doc) = operation.document_id.as_deref() {
                    segments.push(doc);
                }
            }
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    #[instrument(skip(self, operation), fields(operation_id = %operation.id, op_type = %operation.op_type))]
    async fn apply(&self, operation: &QueuedOperation) -> std::result::Result<(), SyncError> {
        let method = match operation.op_type {
            OperationType::Create => Method::POST,
            OperationType::Update => Method::PUT,
            OperationType::Delete => Method::DELETE,
        };
        let url = self.operation_url(operation);

        let mut request = self
            .http
            .request(method, url)
            .header(IDEMPOTENCY_HEADER, operation.idempotency_key());
        if let Some(data) = &operation.data {
            request = request.json(data);
        }

        let response = self.http.send(self.authorize(request)).await?;
        let status = response.status();
        if status.is_success() {
            debug!(%status, "remote accepted operation");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body.chars().take(MAX_ERROR_BODY).collect()
        };
        Err(SyncError::from_status(status.as_u16(), message))
    }

    async fn reconcile(&self) -> std::result::Result<(), SyncError> {
        let Some(url) = self.reconcile_url.clone() else {
            return Ok(());
        };

        let request = self.http.request(Method::POST, url).json(&serde_json::json!({}));
        let response = self.http.send(self.authorize(request)).await?;
        let status = response.status();
        if status.is_success() {
            debug!(%status, "reconcile accepted");
            Ok(())
        } else {
            Err(SyncError::from_status(status.as_u16(), "reconcile rejected"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use offsync_domain::{NewOperation, OperationRequest};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn queued(request: OperationRequest) -> QueuedOperation {
        NewOperation::try_from(request).unwrap().into_queued("018f-op".into(), 0)
    }

    fn remote(server: &MockServer) -> HttpRemoteApi {
        let http = HttpClient::new(Duration::from_secs(5), 1).unwrap();
        HttpRemoteApi::new(http, &server.uri(), "/api").unwrap()
    }

    #[tokio::test]
    async fn create_posts_to_collection_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/trabalhos"))
            .and(header("Idempotency-Key", "create:trabalhos/t1"))
            .and(body_json(json!({ "tonelagem": 10 })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let op = queued(OperationRequest::create("trabalhos", Some("t1".into()), json!({ "tonelagem": 10 })));
        remote(&server).apply(&op).await.unwrap();
    }

    #[tokio::test]
    async fn update_puts_to_document() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/trabalhos/t1"))
            .and(body_json(json!({ "tonelagem": 12 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let op = queued(OperationRequest::update("trabalhos", "t1", json!({ "tonelagem": 12 })));
        remote(&server).apply(&op).await.unwrap();
    }

    #[tokio::test]
    async fn delete_without_body_and_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/tenants/acme/trabalhos/t2"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let op = queued(OperationRequest::delete("tenants/acme/trabalhos", "t2"));
        remote(&server).with_auth_token("secret").apply(&op).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].body.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500).set_body_string("database exploded"))
            .mount(&server)
            .await;

        let op = queued(OperationRequest::delete("trabalhos", "t2"));
        let err = remote(&server).apply(&op).await.unwrap_err();
        assert_eq!(err, SyncError::Server { status: 500, message: "database exploded".into() });
    }

    #[tokio::test]
    async fn auth_failures_map_to_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(401)).mount(&server).await;

        let op = queued(OperationRequest::update("trabalhos", "t1", json!({})));
        let err = remote(&server).apply(&op).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }

    #[tokio::test]
    async fn document_ids_are_percent_encoded() {
        let server = MockServer::start().await;
        let op = queued(OperationRequest::delete("trabalhos", "a b?c"));
        let url = remote(&server).operation_url(&op);
        assert!(url.path().ends_with("/api/trabalhos/a%20b%3Fc"));
    }

    #[tokio::test]
    async fn reconcile_is_a_no_op_without_path() {
        let server = MockServer::start().await;
        remote(&server).reconcile().await.unwrap();
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_posts_to_configured_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/reconcile"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let api = remote(&server).with_reconcile_path(&server.uri(), "/api/reconcile").unwrap();
        api.reconcile().await.unwrap();
    }

    #[test]
    fn rejects_invalid_base_url() {
        let http = HttpClient::new(Duration::from_secs(5), 1).unwrap();
        let err = HttpRemoteApi::new(http, "not a url", "/api").err().unwrap();
        assert!(matches!(err, QueueError::Config(_)));
    }
}
