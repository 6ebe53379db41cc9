//! Online/offline detection.
//!
//! The platform (browser events, OS network callbacks, a health probe) feeds
//! [`PlatformEvent`]s into a [`ConnectivityDetector`]; everything else reads
//! the current state or subscribes to transitions through
//! [`ConnectivitySource`], which tests can implement directly.

use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    Online,
    Offline,
}

/// What the sync engine needs to know about the network.
pub trait ConnectivitySource: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline transition.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Online flag plus the number of writes still waiting for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityStatus {
    pub online: bool,
    pub pending_count: usize,
}

pub struct ConnectivityDetector {
    tx: watch::Sender<bool>,
}

impl ConnectivityDetector {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    pub fn handle_event(&self, event: PlatformEvent) {
        self.set_online(event == PlatformEvent::Online);
    }

    /// Record the current state. Subscribers are only woken on a change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                info!("network: online");
            } else {
                warn!("network: offline");
            }
        }
    }
}

impl Default for ConnectivityDetector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivitySource for ConnectivityDetector {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_toggle_status() {
        let detector = ConnectivityDetector::new(true);
        assert!(detector.is_online());
        detector.handle_event(PlatformEvent::Offline);
        assert!(!detector.is_online());
        detector.handle_event(PlatformEvent::Online);
        assert!(detector.is_online());
    }

    #[tokio::test]
    async fn subscribers_see_transitions_but_not_repeats() {
        let detector = ConnectivityDetector::new(false);
        let mut rx = detector.subscribe();

        detector.set_online(false);
        assert!(!rx.has_changed().unwrap());

        detector.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(!rx.has_changed().unwrap());
    }
}
