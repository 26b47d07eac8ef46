//! Connectivity state with edge-triggered notifications

use offsync_domain::ConnectivityEvent;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

const EVENT_CAPACITY: usize = 16;

/// Tracks whether the network is believed reachable.
///
/// This is a best-effort signal. Reported online does not mean every call
/// will succeed; unreachable remotes surface as per-operation failures.
pub struct ConnectivityMonitor {
    online: Mutex<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { online: Mutex::new(initially_online), events }
    }

    pub fn is_online(&self) -> bool {
        *self.online.lock()
    }

    /// Update the state. Returns the event emitted, if the state changed.
    ///
    /// Detection and emission happen under the same lock so two racing
    /// updates cannot both report the same edge.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let mut current = self.online.lock();
        if *current == online {
            return None;
        }
        *current = online;

        let event = ConnectivityEvent::for_state(online);
        info!(online, "connectivity changed");
        // No receivers is fine.
        let _ = self.events.send(event);
        Some(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    #[test]
    fn emits_once_per_edge() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        assert_eq!(monitor.set_online(true), Some(ConnectivityEvent::BecameOnline));
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(false), Some(ConnectivityEvent::BecameOffline));
        assert_eq!(monitor.set_online(false), None);

        assert_eq!(rx.try_recv(), Ok(ConnectivityEvent::BecameOnline));
        assert_eq!(rx.try_recv(), Ok(ConnectivityEvent::BecameOffline));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn initial_state_is_respected() {
        assert!(ConnectivityMonitor::new(true).is_online());
        assert!(!ConnectivityMonitor::default().is_online());
    }

    #[test]
    fn racing_updates_report_a_single_edge() {
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || monitor.set_online(true).is_some())
            })
            .collect();

        let edges = handles.into_iter().filter_map(|h| h.join().ok()).filter(|edge| *edge).count();
        assert_eq!(edges, 1);
        assert!(monitor.is_online());
    }
}
