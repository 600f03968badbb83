//! Connectivity monitoring.
//!
//! The engine does not check the network itself. It watches a boolean
//! supplied by the environment and feeds changes into the pure
//! [`ConnectivityState`](optisync_core::ConnectivityState) machine.

use std::sync::Arc;
use tokio::sync::watch;

/// Source of online/offline status.
pub trait ConnectivityMonitor: Send + Sync {
    /// Current status.
    fn is_online(&self) -> bool;

    /// Receiver that observes every status change.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Connectivity controlled by the application (or a test).
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl ManualConnectivity {
    /// Create a monitor with the given initial status.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Report a status. Repeating the current status is a no-op for
    /// watchers.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl<T: ConnectivityMonitor + ?Sized> ConnectivityMonitor for Arc<T> {
    fn is_online(&self) -> bool {
        (**self).is_online()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        (**self).watch()
    }
}
