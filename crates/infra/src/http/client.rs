use std::time::Duration;

use offsync_core::RetryPolicy;
use offsync_domain::constants::DEFAULT_TRANSPORT_BACKOFF_MS;
use offsync_domain::{QueueError, Result, SyncError};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use tracing::debug;

use crate::errors::conversions::sync_error_from_http;

const USER_AGENT: &str = concat!("offsync/", env!("CARGO_PKG_VERSION"));
const MAX_TRANSPORT_BACKOFF: Duration = Duration::from_secs(5);

/// reqwest client that replays a request on transient transport failures.
///
/// A failure is retried when [`SyncError::is_transient`] says so, except for
/// authentication errors, which a replay cannot fix. When attempts run out
/// the last response is returned as-is for the caller to classify; only
/// transport errors become `Err`.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    retry: RetryPolicy,
}

impl HttpClient {
    /// `attempts` counts the initial try; zero is treated as one.
    ///
    /// # Errors
    /// Returns `QueueError::Config` if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration, attempts: u32) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .no_proxy()
            .build()
            .map_err(|err| QueueError::Config(format!("failed to build HTTP client: {err}")))?;

        let retry = RetryPolicy::new(
            Duration::from_millis(DEFAULT_TRANSPORT_BACKOFF_MS),
            MAX_TRANSPORT_BACKOFF,
            Some(attempts.max(1)),
        );
        Ok(Self { client, retry })
    }

    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    pub async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, SyncError> {
        let mut failures = 0u32;
        loop {
            let attempt = request
                .try_clone()
                .ok_or_else(|| SyncError::Config("streaming request bodies cannot be replayed".into()))?;

            let error = match attempt.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let error =
                        SyncError::from_status(status.as_u16(), status.canonical_reason().unwrap_or(""));
                    failures += 1;
                    if !self.should_retry(&error, failures) {
                        return Ok(response);
                    }
                    error
                }
                Err(err) => {
                    let error = sync_error_from_http(&err);
                    failures += 1;
                    if !self.should_retry(&error, failures) {
                        return Err(error);
                    }
                    error
                }
            };

            let delay = self.retry.delay_for(failures);
            debug!(failures, delay_ms = delay.as_millis() as u64, error = %error, "retrying HTTP request");
            tokio::time::sleep(delay).await;
        }
    }

    fn should_retry(&self, error: &SyncError, failures: u32) -> bool {
        error.is_transient() && !matches!(error, SyncError::Auth(_)) && !self.retry.exhausted(failures)
    }
}
