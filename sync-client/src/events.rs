//! Connection-change notifications.
//!
//! Each [`SyncClient`](crate::SyncClient) owns one [`ConnectionEvents`]
//! emitter. Listeners are called synchronously, in registration order, from
//! whichever task observed the change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Payload delivered to connection-change listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionChange {
    /// New connectivity status.
    pub is_online: bool,
}

type Listener = Arc<dyn Fn(ConnectionChange) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

fn lock(table: &Mutex<ListenerTable>) -> MutexGuard<'_, ListenerTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Emitter for connection-change notifications.
#[derive(Clone, Default)]
pub struct ConnectionEvents {
    table: Arc<Mutex<ListenerTable>>,
}

impl std::fmt::Debug for ConnectionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEvents")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ConnectionEvents {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    ///
    /// The listener stays registered until [`Unsubscribe::unsubscribe`] is
    /// called; dropping the handle does not remove it.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(ConnectionChange) + Send + Sync + 'static,
    {
        let mut table = lock(&self.table);
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, Arc::new(listener)));
        Unsubscribe {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Notify every registered listener.
    pub fn emit(&self, is_online: bool) {
        // Snapshot so listeners may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener> = lock(&self.table)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let change = ConnectionChange { is_online };
        for listener in listeners {
            listener(change);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.table).entries.len()
    }
}

/// Handle returned by [`ConnectionEvents::subscribe`].
#[derive(Debug)]
pub struct Unsubscribe {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl Unsubscribe {
    /// Remove the listener. No-op if the emitter is gone.
    pub fn unsubscribe(self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).entries.retain(|(id, _)| *id != self.id);
        }
    }
}
