//! Periodic reachability probe feeding the connectivity monitor.
//!
//! Any HTTP response, whatever its status, means the network is up. Connect
//! failures and timeouts mean it is down. The monitor only emits on edges,
//! so probing the same state repeatedly is silent.

use std::sync::Arc;
use std::time::Duration;

use offsync_core::ConnectivityMonitor;
use offsync_domain::{ConnectivityConfig, QueueError, Result};
use reqwest::{Method, Url};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::http::HttpClient;
use crate::scheduling::error::{SchedulerError, SchedulerResult};

type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnectivityProbe {
    monitor: Arc<ConnectivityMonitor>,
    http: HttpClient,
    url: Url,
    interval: Duration,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl ConnectivityProbe {
    pub fn new(
        monitor: Arc<ConnectivityMonitor>,
        url: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|err| QueueError::Config(format!("invalid probe_url {url:?}: {err}")))?;
        let http = HttpClient::new(timeout, 1)?;
        Ok(Self {
            monitor,
            http,
            url,
            interval,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        })
    }

    /// Build a probe when `probe_url` is configured.
    pub fn from_config(
        monitor: Arc<ConnectivityMonitor>,
        config: &ConnectivityConfig,
    ) -> Result<Option<Self>> {
        config
            .probe_url
            .as_deref()
            .map(|url| Self::new(monitor, url, config.probe_interval(), config.probe_timeout()))
            .transpose()
    }

    /// Probe once and push the result into the monitor.
    pub async fn check_now(&self) -> bool {
        Self::probe(&self.http, &self.url, &self.monitor).await
    }

    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation_token = CancellationToken::new();
        let cancel = self.cancellation_token.clone();
        let http = self.http.clone();
        let url = self.url.clone();
        let monitor = Arc::clone(&self.monitor);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Connectivity probe cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        Self::probe(&http, &url, &monitor).await;
                    }
                }
            }
        });

        *self.task_handle.lock().await = Some(handle);
        info!(interval_secs = self.interval.as_secs(), "Connectivity probe started");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation_token.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(JOIN_TIMEOUT, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: JOIN_TIMEOUT.as_secs() })??;
        }

        info!("Connectivity probe stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn probe(http: &HttpClient, url: &Url, monitor: &ConnectivityMonitor) -> bool {
        let online = match http.send(http.request(Method::HEAD, url.clone())).await {
            Ok(response) => {
                debug!(status = %response.status(), "probe reached remote");
                true
            }
            Err(err) => {
                debug!(error = %err, "probe failed");
                false
            }
        };
        monitor.set_online(online);
        online
    }
}

impl Drop for ConnectivityProbe {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("ConnectivityProbe dropped while running; cancelling tasks");
            self.cancellation_token.cancel();
        }
    }
}
