//! Sync scheduler: turns connectivity edges and a periodic timer into drain
//! passes.
//!
//! Triggers handled here:
//! - `BecameOnline` arms a debounce timer; the pass starts when it fires
//!   unless `BecameOffline` arrives first
//! - `start` itself requests a pass when the device is already online with
//!   work outstanding
//! - a periodic tick (first one a full period after start) requests a pass
//!   only if the device is online and work is outstanding
//!
//! Enqueue-driven passes go straight through the coordinator's
//! `SyncTrigger` impl. Every request is single-flight; failures are logged
//! and kept in the coordinator's last report.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use offsync_core::{PendingAggregator, SyncCoordinator};
//! use offsync_infra::scheduling::{SyncScheduler, SyncSchedulerConfig};
//!
//! # async fn example(
//! #     coordinator: Arc<SyncCoordinator>,
//! #     aggregator: Arc<PendingAggregator>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let mut scheduler =
//!     SyncScheduler::new(coordinator, aggregator, SyncSchedulerConfig::default())?;
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use offsync_core::{PendingAggregator, SyncCoordinator};
use offsync_domain::{ConnectivityEvent, SyncConfig, SyncTriggerSource};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Configuration for sync scheduler
#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// Period of the "sync if anything is pending" timer
    pub interval: Duration,
    /// Quiet period after reconnecting before a pass starts
    pub reconnect_debounce: Duration,
    /// Timeout for joining the loop and any in-flight pass on stop
    pub join_timeout: Duration,
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSchedulerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: config.interval(),
            reconnect_debounce: config.reconnect_debounce(),
            join_timeout: config.call_timeout().max(Duration::from_secs(5)),
        }
    }
}

struct SchedulerContext {
    coordinator: Arc<SyncCoordinator>,
    aggregator: Arc<PendingAggregator>,
}

pub struct SyncScheduler {
    coordinator: Arc<SyncCoordinator>,
    aggregator: Arc<PendingAggregator>,
    config: SyncSchedulerConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl SyncScheduler {
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        aggregator: Arc<PendingAggregator>,
        config: SyncSchedulerConfig,
    ) -> SchedulerResult<Self> {
        if config.interval.is_zero() {
            return Err(SchedulerError::InvalidConfig("sync interval must be positive".into()));
        }

        Ok(Self {
            coordinator,
            aggregator,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        })
    }

    /// Spawn the scheduling loop.
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is already running
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!("Starting sync scheduler");

        // Fresh token so the scheduler can be restarted after stop
        self.cancellation_token = CancellationToken::new();

        let context = SchedulerContext {
            coordinator: Arc::clone(&self.coordinator),
            aggregator: Arc::clone(&self.aggregator),
        };
        // Subscribe before spawning so no edge is missed in between.
        let events = self.coordinator.monitor().subscribe();
        let config = self.config.clone();
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::schedule_loop(context, events, config, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);

        // Work left over from a previous run drains without waiting a period.
        Self::sync_if_pending(&self.coordinator, &self.aggregator).await;

        info!(
            interval_secs = self.config.interval.as_secs(),
            debounce_ms = self.config.reconnect_debounce.as_millis() as u64,
            "Sync scheduler started"
        );
        Ok(())
    }

    /// Stop the loop and wait for an in-flight pass to finish.
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is not running or a task outlives the
    /// join timeout
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Stopping sync scheduler");
        self.cancellation_token.cancel();

        let join_timeout = self.config.join_timeout;
        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: join_timeout.as_secs() })??;
        }

        if !self.coordinator.wait_idle(join_timeout).await {
            warn!("sync pass still running after join timeout");
            return Err(SchedulerError::Timeout { seconds: join_timeout.as_secs() });
        }

        info!("Sync scheduler stopped");
        Ok(())
    }

    /// A scheduler is running if it has an active task handle that hasn't
    /// finished.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn schedule_loop(
        context: SchedulerContext,
        mut events: tokio::sync::broadcast::Receiver<ConnectivityEvent>,
        config: SyncSchedulerConfig,
        cancel: CancellationToken,
    ) {
        let SchedulerContext { coordinator, aggregator } = context;

        let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let debounce = tokio::time::sleep(config.reconnect_debounce);
        tokio::pin!(debounce);
        let mut debounce_armed = false;
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Sync loop cancelled");
                    break;
                }
                event = events.recv(), if events_open => match event {
                    Ok(ConnectivityEvent::BecameOnline) => {
                        debug!(debounce_ms = config.reconnect_debounce.as_millis() as u64, "reconnected; debouncing sync");
                        debounce.as_mut().reset(Instant::now() + config.reconnect_debounce);
                        debounce_armed = true;
                    }
                    Ok(ConnectivityEvent::BecameOffline) => {
                        if debounce_armed {
                            debug!("went offline during debounce; reconnect sync cancelled");
                        }
                        debounce_armed = false;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connectivity events lagged; resynchronising");
                        debounce_armed = coordinator.monitor().is_online();
                        if debounce_armed {
                            debounce.as_mut().reset(Instant::now() + config.reconnect_debounce);
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("connectivity channel closed");
                        events_open = false;
                    }
                },
                () = &mut debounce, if debounce_armed => {
                    debounce_armed = false;
                    let outcome = coordinator.request_sync(SyncTriggerSource::Reconnect);
                    debug!(?outcome, "reconnect sync requested");
                }
                _ = ticker.tick() => {
                    Self::sync_if_pending(&coordinator, &aggregator).await;
                }
            }
        }
    }

    async fn sync_if_pending(coordinator: &SyncCoordinator, aggregator: &PendingAggregator) {
        if !coordinator.monitor().is_online() {
            debug!("interval tick skipped: offline");
            return;
        }

        match aggregator.count().await {
            Ok(0) => debug!("interval tick skipped: nothing pending"),
            Ok(pending) => {
                let outcome = coordinator.request_sync(SyncTriggerSource::Interval);
                debug!(pending, ?outcome, "interval sync requested");
            }
            Err(err) => warn!(error = %err, "interval tick could not read pending count"),
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("SyncScheduler dropped while running; cancelling tasks");
            self.cancellation_token.cancel();
        }
    }
}
