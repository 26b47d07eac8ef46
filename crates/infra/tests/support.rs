use std::time::Duration;

use offsync_domain::Config;
use offsync_infra::OfflineQueue;
use tempfile::TempDir;
use wiremock::MockServer;

/// Configuration pointing at `server` with a queue file inside `dir`.
///
/// Transport retries and backoff are disabled so each drain pass makes
/// exactly one request per operation.
pub fn test_config(dir: &TempDir, server: &MockServer) -> Config {
    let mut config = Config::default();
    config.database.path = dir.path().join("queue.db").to_string_lossy().into_owned();
    config.remote.base_url = server.uri();
    config.remote.transport_attempts = 1;
    config.sync.reconnect_debounce_ms = 20;
    config.sync.backoff_base_ms = 0;
    config.sync.call_timeout_secs = 5;
    config
}

/// Wait until the published pending count equals `expected`.
pub async fn wait_for_pending(queue: &OfflineQueue, expected: u64) -> bool {
    let mut pending = queue.subscribe_pending();
    tokio::time::timeout(Duration::from_secs(5), pending.wait_for(|count| *count == expected))
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false)
}

/// Poll until no drain pass is in flight.
pub async fn wait_until_idle(queue: &OfflineQueue) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while queue.is_syncing() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}
