//! Local state store and reconciliation.
//!
//! [`LocalStore`] owns the materialized state and the pending [`EventQueue`].
//! It maintains these invariants after every operation:
//!
//! - `queue[0].state_before` is the confirmed base (state without any
//!   pending local event)
//! - `queue[i + 1].state_before == merge(queue[i].state_before, queue[i].event)`
//! - `state == merge(queue[last].state_before, queue[last].event)`, or the
//!   confirmed base when the queue is empty
//!
//! Remote events are inserted as if they arrived before every pending local
//! event: fold the remote event onto the base, then replay the queue.

use std::sync::Arc;

use optisync_types::{Event, EventId, EventStatus};

use crate::merge::MergePolicy;
use crate::queue::EventQueue;

/// Materialized state plus the queue of unconfirmed events.
pub struct LocalStore<S, P> {
    policy: Arc<dyn MergePolicy<S, P>>,
    state: S,
    queue: EventQueue<S, P>,
}

impl<S, P> std::fmt::Debug for LocalStore<S, P>
where
    S: std::fmt::Debug,
    P: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("state", &self.state)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<S: Clone, P: Clone> LocalStore<S, P> {
    /// Create a store with the given merge policy and initial state.
    pub fn new(policy: Arc<dyn MergePolicy<S, P>>, initial: S) -> Self {
        Self {
            policy,
            state: initial,
            queue: EventQueue::new(),
        }
    }

    /// Current materialized (optimistic) state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// State without any pending local event applied.
    pub fn confirmed(&self) -> &S {
        self.queue
            .oldest()
            .map(|entry| &entry.state_before)
            .unwrap_or(&self.state)
    }

    /// The pending queue.
    pub fn queue(&self) -> &EventQueue<S, P> {
        &self.queue
    }

    /// Mutable access for status bookkeeping.
    ///
    /// Entries cannot be added or removed through this handle, so the
    /// snapshot invariants are preserved.
    pub fn queue_mut(&mut self) -> &mut EventQueue<S, P> {
        &mut self.queue
    }

    /// The merge policy in use.
    pub fn policy(&self) -> &Arc<dyn MergePolicy<S, P>> {
        &self.policy
    }

    /// Optimistically apply a local event and queue it.
    pub fn apply(&mut self, event: Event<P>) -> EventId {
        let id = event.id;
        let state_before = self.state.clone();
        self.state = self.policy.merge(&state_before, &event);
        self.queue.push(event, state_before);
        id
    }

    /// Insert a remote event beneath all pending local events.
    pub fn reconcile(&mut self, remote: &Event<P>) {
        if self.queue.is_empty() {
            self.state = self.policy.merge(&self.state, remote);
            return;
        }
        let confirmed = self.policy.merge(self.confirmed(), remote);
        self.replay_from(confirmed);
    }

    /// Remove an acknowledged event from the queue.
    ///
    /// Returns the event marked `ACKNOWLEDGED`, or `None` if it was not
    /// queued (already acknowledged or never applied here).
    ///
    /// Acknowledging an entry other than the oldest moves its effect into the
    /// confirmed base ahead of the older pending events. With an
    /// order-sensitive policy the current state can change as a result
    /// (`[1, 2]` becomes `[2, 1]`).
    pub fn acknowledge(&mut self, id: &EventId) -> Option<Event<P>> {
        let index = self.queue.position(id)?;
        let entry = self.queue.remove_at(index)?;
        if index > 0 {
            // Confirmed out of order: fold it into the base so the next
            // reconciliation does not drop its effect.
            let base = match self.queue.oldest() {
                Some(head) => self.policy.merge(&head.state_before, &entry.event),
                None => self.state.clone(),
            };
            self.replay_from(base);
        }
        let mut event = entry.event;
        event.status = EventStatus::Acknowledged;
        Some(event)
    }

    /// Replace the confirmed base (e.g. with freshly fetched server state)
    /// and replay pending events on top.
    pub fn rebase(&mut self, base: S) {
        self.replay_from(base);
    }

    fn replay_from(&mut self, base: S) {
        let policy = Arc::clone(&self.policy);
        let mut acc = base;
        for entry in self.queue.entries_mut() {
            let next = policy.merge(&acc, &entry.event);
            entry.state_before = acc;
            acc = next;
        }
        self.state = acc;
    }
}
