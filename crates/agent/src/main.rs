//! Offsync agent
//!
//! Runs the offline queue engine against the configured remote until Ctrl-C.
//! Configuration comes from `OFFSYNC_CONFIG`, a probed `offsync.toml`, or
//! defaults, with `OFFSYNC_*` overrides (a `.env` file is honoured).

use std::time::Duration;

use anyhow::Context;
use offsync_infra::{config, logging, OfflineQueue};
use tracing::{info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading configuration so overrides apply
    let dotenv = dotenvy::dotenv();

    let config = config::load().context("failed to load configuration")?;
    logging::init_tracing(&config.logging).context("failed to initialise logging")?;

    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => warn!(error = %err, "could not load .env file"),
    }

    info!(
        db_path = %config.database.path,
        remote = %config.remote.base_url,
        sync_enabled = config.sync.enabled,
        "offsync agent starting"
    );

    let mut queue = OfflineQueue::open(config).await.context("failed to open offline queue")?;
    queue.start().await.context("failed to start background sync")?;

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                info!("shutdown requested");
                break;
            }
            _ = status.tick() => log_status(&queue).await,
        }
    }

    queue.close().await.context("failed to close offline queue")?;
    info!("offsync agent stopped");
    Ok(())
}

async fn log_status(queue: &OfflineQueue) {
    let pending = match queue.pending_count().await {
        Ok(count) => count,
        Err(err) => {
            warn!(error = %err, "failed to read pending count");
            return;
        }
    };
    let abandoned = queue.abandoned().await.map(|ops| ops.len()).unwrap_or_default();
    let last_failures = queue.last_report().map(|report| report.failures()).unwrap_or_default();

    info!(online = queue.is_online(), pending, abandoned, last_failures, "queue status");
}
