//! Offline queue engine - wires the store, sync pipeline and schedulers
//!
//! ```text
//! enqueue ─▶ OperationEnqueuer ─▶ SqliteOperationStore
//!                 │                      ▲
//!                 ▼ notify               │ drain
//!           SyncCoordinator ─▶ SyncExecutor ─▶ HttpRemoteApi
//!                 ▲
//!   SyncScheduler (reconnect / interval) ◀─ ConnectivityMonitor ◀─ ConnectivityProbe
//! ```
//!
//! Lifecycle is explicit: [`OfflineQueueBuilder::open`] → [`OfflineQueue::start`]
//! → [`OfflineQueue::close`].

use std::sync::Arc;
use std::time::Duration;

use offsync_core::{
    ConnectivityMonitor, OperationEnqueuer, OperationStore, PendingAggregator, RemoteApi,
    RetryPolicy, SyncCoordinator, SyncExecutor, SyncStats, SyncTrigger,
};
use offsync_domain::{
    Config, ConnectivityEvent, OperationRequest, OperationStatus, QueueError, QueuedOperation,
    Result, SyncReport, SyncRequest, SyncTriggerSource,
};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::connectivity::ConnectivityProbe;
use crate::database::SqliteOperationStore;
use crate::remote::HttpRemoteApi;
use crate::scheduling::{SchedulerError, SchedulerResult, SyncScheduler, SyncSchedulerConfig};

const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Assembles an [`OfflineQueue`] from configuration.
pub struct OfflineQueueBuilder {
    config: Config,
    remote: Option<Arc<dyn RemoteApi>>,
    monitor: Option<Arc<ConnectivityMonitor>>,
    retry_policy: Option<RetryPolicy>,
}

impl OfflineQueueBuilder {
    pub fn new(config: Config) -> Self {
        Self { config, remote: None, monitor: None, retry_policy: None }
    }

    /// Use `remote` instead of the HTTP adapter built from `config.remote`.
    pub fn remote(mut self, remote: Arc<dyn RemoteApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Share an existing monitor instead of creating one from
    /// `connectivity.assume_online`.
    pub fn monitor(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Open the durable store and wire every component. Nothing runs in the
    /// background until [`OfflineQueue::start`].
    ///
    /// # Errors
    /// Returns `QueueError::Config` for invalid settings and
    /// `QueueError::Storage` if the queue file cannot be opened.
    #[instrument(skip(self), fields(db_path = %self.config.database.path))]
    pub async fn open(self) -> Result<OfflineQueue> {
        let Self { config, remote, monitor, retry_policy } = self;
        crate::config::validate(&config)?;

        let store =
            Arc::new(SqliteOperationStore::open(&config.database.path, config.database.pool_size).await?);
        let dyn_store: Arc<dyn OperationStore> = store.clone();

        let remote = match remote {
            Some(remote) => remote,
            None => Arc::new(HttpRemoteApi::from_config(&config.remote)?) as Arc<dyn RemoteApi>,
        };
        let monitor = monitor
            .unwrap_or_else(|| Arc::new(ConnectivityMonitor::new(config.connectivity.assume_online)));
        let policy = retry_policy.unwrap_or_else(|| RetryPolicy::from_config(&config.sync));

        let aggregator = Arc::new(PendingAggregator::new(Arc::clone(&dyn_store)));
        aggregator.refresh().await?;

        let executor = Arc::new(
            SyncExecutor::new(Arc::clone(&dyn_store), remote, policy, config.sync.call_timeout())
                .with_aggregator(Arc::clone(&aggregator)),
        );
        let coordinator = Arc::new(SyncCoordinator::new(executor, Arc::clone(&monitor)));

        let mut enqueuer =
            OperationEnqueuer::new(Arc::clone(&dyn_store)).with_aggregator(Arc::clone(&aggregator));
        if config.sync.enabled {
            let trigger: Arc<dyn SyncTrigger> = coordinator.clone();
            enqueuer = enqueuer.with_trigger(trigger);
        }

        let scheduler = SyncScheduler::new(
            Arc::clone(&coordinator),
            Arc::clone(&aggregator),
            SyncSchedulerConfig::from(&config.sync),
        )?;
        let probe = ConnectivityProbe::from_config(Arc::clone(&monitor), &config.connectivity)?;

        info!(pending = aggregator.latest(), "offline queue opened");
        Ok(OfflineQueue {
            config,
            store,
            aggregator,
            monitor,
            coordinator,
            enqueuer,
            scheduler,
            probe,
        })
    }
}

/// Offline-first write queue with background reconciliation.
pub struct OfflineQueue {
    config: Config,
    store: Arc<SqliteOperationStore>,
    aggregator: Arc<PendingAggregator>,
    monitor: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
    enqueuer: OperationEnqueuer,
    scheduler: SyncScheduler,
    probe: Option<ConnectivityProbe>,
}

impl OfflineQueue {
    pub fn builder(config: Config) -> OfflineQueueBuilder {
        OfflineQueueBuilder::new(config)
    }

    /// Open with everything derived from `config`.
    pub async fn open(config: Config) -> Result<Self> {
        OfflineQueueBuilder::new(config).open().await
    }

    /// Start the connectivity probe and the sync scheduler.
    ///
    /// With `sync.enabled = false` only manual syncs run.
    ///
    /// # Errors
    /// Returns `QueueError::Internal` if a background task is already running
    /// or fails to start in time.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        if let Some(probe) = self.probe.as_mut() {
            start_with_timeout("ConnectivityProbe", probe.start()).await?;
        }

        if self.config.sync.enabled {
            start_with_timeout("SyncScheduler", self.scheduler.start()).await?;
        } else {
            info!("background sync disabled; only manual syncs will run");
        }
        Ok(())
    }

    /// Stop background work, wait for an in-flight pass and release the
    /// store. Safe to call more than once.
    #[instrument(skip(self))]
    pub async fn close(&mut self) -> Result<()> {
        if let Some(probe) = self.probe.as_mut() {
            ignore_not_running(probe.stop().await)?;
        }
        ignore_not_running(self.scheduler.stop().await)?;

        let join_timeout = SyncSchedulerConfig::from(&self.config.sync).join_timeout;
        if !self.coordinator.wait_idle(join_timeout).await {
            warn!("closing while a sync pass is still running");
        }

        self.store.close();
        info!("offline queue closed");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Durably record a mutation; returns the operation id.
    pub async fn enqueue(&self, request: OperationRequest) -> Result<String> {
        self.enqueuer.enqueue(request).await
    }

    /// Operations still awaiting sync (`pending + failed`).
    pub async fn pending_count(&self) -> Result<u64> {
        self.aggregator.refresh().await
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<u64> {
        self.aggregator.subscribe()
    }

    pub fn request_sync(&self) -> SyncRequest {
        self.coordinator.request_sync(SyncTriggerSource::Manual)
    }

    /// Run a pass inline. `None` when offline or a pass is already running.
    pub async fn sync_now(&self) -> Option<SyncReport> {
        self.coordinator.sync_now(SyncTriggerSource::Manual).await
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.coordinator.last_report()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.coordinator.stats()
    }

    pub fn is_syncing(&self) -> bool {
        self.coordinator.is_syncing()
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Manual connectivity override, for hosts with their own network
    /// detection.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        self.monitor.set_online(online)
    }

    /// Dead-lettered operations, oldest first.
    pub async fn abandoned(&self) -> Result<Vec<QueuedOperation>> {
        self.store.list_by_status(OperationStatus::Abandoned).await
    }

    /// Put a dead-lettered (or failed) operation back in line.
    ///
    /// # Errors
    /// Returns `QueueError::NotFound` unless the operation is `failed` or
    /// `abandoned`.
    pub async fn requeue(&self, id: &str) -> Result<QueuedOperation> {
        let operation = self.store.requeue(id).await?;
        info!(operation_id = %operation.id, "operation requeued");
        self.refresh_pending().await;
        if self.config.sync.enabled {
            self.coordinator.notify_enqueued();
        }
        Ok(operation)
    }

    /// Permanently discard an operation.
    pub async fn purge(&self, id: &str) -> Result<()> {
        self.store.purge(id).await?;
        info!(operation_id = %id, "operation purged");
        self.refresh_pending().await;
        Ok(())
    }

    pub fn store(&self) -> &Arc<SqliteOperationStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn refresh_pending(&self) {
        if let Err(err) = self.aggregator.refresh().await {
            warn!(error = %err, "failed to refresh pending count");
        }
    }
}

async fn start_with_timeout<F>(name: &str, start: F) -> Result<()>
where
    F: std::future::Future<Output = SchedulerResult<()>>,
{
    tokio::time::timeout(START_TIMEOUT, start)
        .await
        .map_err(|_| {
            error!(component = name, timeout_secs = START_TIMEOUT.as_secs(), "start timed out");
            QueueError::Internal(format!("{name} start timed out after {}s", START_TIMEOUT.as_secs()))
        })?
        .map_err(|err| {
            error!(component = name, error = %err, "failed to start");
            QueueError::Internal(format!("failed to start {name}: {err}"))
        })
}

fn ignore_not_running(result: SchedulerResult<()>) -> Result<()> {
    match result {
        Ok(()) | Err(SchedulerError::NotRunning) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
