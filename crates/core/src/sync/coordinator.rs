//! Single-flight drain pass coordination
//!
//! Every trigger (reconnect, interval timer, enqueue, manual) funnels through
//! [`SyncCoordinator`]. At most one drain pass runs at a time; requests that
//! arrive while a pass is in flight are dropped rather than queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use offsync_domain::{SyncReport, SyncRequest, SyncTriggerSource};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::executor::SyncExecutor;
use crate::connectivity::ConnectivityMonitor;
use crate::queue::ports::SyncTrigger;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Counters describing how sync requests were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub passes: u64,
    pub aborted: u64,
    pub skipped_busy: u64,
    pub skipped_offline: u64,
}

#[derive(Default)]
struct StatCounters {
    passes: AtomicU64,
    aborted: AtomicU64,
    skipped_busy: AtomicU64,
    skipped_offline: AtomicU64,
}

struct Shared {
    executor: Arc<SyncExecutor>,
    monitor: Arc<ConnectivityMonitor>,
    running: Arc<AtomicBool>,
    last_report: Mutex<Option<SyncReport>>,
    stats: StatCounters,
}

/// Releases the single-flight flag when dropped, including on panic.
struct FlightGuard {
    running: Arc<AtomicBool>,
}

impl FlightGuard {
    fn acquire(running: &Arc<AtomicBool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running: Arc::clone(running) })
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    shared: Arc<Shared>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    pub fn new(executor: Arc<SyncExecutor>, monitor: Arc<ConnectivityMonitor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                executor,
                monitor,
                running: Arc::new(AtomicBool::new(false)),
                last_report: Mutex::new(None),
                stats: StatCounters::default(),
            }),
            in_flight: Mutex::new(None),
        }
    }

    /// Start a drain pass in the background if none is running and the
    /// network is believed reachable.
    ///
    /// Never blocks and never fails; the outcome of the pass is available
    /// through [`Self::last_report`].
    pub fn request_sync(&self, source: SyncTriggerSource) -> SyncRequest {
        if !self.shared.monitor.is_online() {
            self.shared.stats.skipped_offline.fetch_add(1, Ordering::Relaxed);
            debug!(trigger = %source, "sync skipped: offline");
            return SyncRequest::Offline;
        }

        let Some(guard) = FlightGuard::acquire(&self.shared.running) else {
            self.shared.stats.skipped_busy.fetch_add(1, Ordering::Relaxed);
            debug!(trigger = %source, "sync skipped: pass already running");
            return SyncRequest::AlreadyRunning;
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "cannot start sync outside a tokio runtime");
                return SyncRequest::AlreadyRunning;
            }
        };

        // Hold the slot across the spawn so a finished pass can never
        // overwrite the handle of the one that follows it.
        let mut slot = self.in_flight.lock();
        let shared = Arc::clone(&self.shared);
        *slot = Some(runtime.spawn(async move {
            let _guard = guard;
            shared.run_pass(source).await;
        }));
        SyncRequest::Started
    }

    /// Run a drain pass inline under the same single-flight guard.
    ///
    /// Returns `None` when offline or when another pass is in flight.
    pub async fn sync_now(&self, source: SyncTriggerSource) -> Option<SyncReport> {
        if !self.shared.monitor.is_online() {
            self.shared.stats.skipped_offline.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let Some(_guard) = FlightGuard::acquire(&self.shared.running) else {
            self.shared.stats.skipped_busy.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        Some(self.shared.run_pass(source).await)
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.shared.last_report.lock().clone()
    }

    pub fn stats(&self) -> SyncStats {
        let stats = &self.shared.stats;
        SyncStats {
            passes: stats.passes.load(Ordering::Relaxed),
            aborted: stats.aborted.load(Ordering::Relaxed),
            skipped_busy: stats.skipped_busy.load(Ordering::Relaxed),
            skipped_offline: stats.skipped_offline.load(Ordering::Relaxed),
        }
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.shared.monitor
    }

    /// Wait until no pass is running, background or inline.
    ///
    /// Returns `false` if one was still running after `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let handle = self.in_flight.lock().take();
            match handle {
                Some(mut handle) => match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(error = %err, "sync pass task failed"),
                    Err(_) => {
                        let mut slot = self.in_flight.lock();
                        if slot.is_none() {
                            *slot = Some(handle);
                        }
                        return false;
                    }
                },
                None if !self.is_syncing() => return true,
                None => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
            }
        }
    }
}

impl Shared {
    async fn run_pass(&self, trigger: SyncTriggerSource) -> SyncReport {
        let started_at = Utc::now();
        info!(trigger = %trigger, "sync pass started");

        let (summary, error) = match self.executor.drain().await {
            Ok(summary) => (Some(summary), None),
            Err(err) => {
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                error!(trigger = %trigger, error = %err, "sync pass aborted");
                (None, Some(err.to_string()))
            }
        };
        self.stats.passes.fetch_add(1, Ordering::Relaxed);

        let report = SyncReport { trigger, started_at, finished_at: Utc::now(), summary, error };
        if report.failures() > 0 {
            warn!(failures = report.failures(), "last sync had failures");
        }
        *self.last_report.lock() = Some(report.clone());
        report
    }
}

impl SyncTrigger for SyncCoordinator {
    fn notify_enqueued(&self) {
        if self.shared.monitor.is_online() {
            self.request_sync(SyncTriggerSource::Enqueue);
        }
    }
}
