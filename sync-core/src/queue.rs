//! Pending event queue for optisync.
//!
//! This module tracks every event applied locally but not yet confirmed by
//! the backend, with:
//! - Insertion (causal application) ordering
//! - The state snapshot taken immediately before each event was applied
//! - In-flight tracking so one event is never submitted twice concurrently
//!
//! Entries are updated in place. Replay always reads the latest event record
//! (status, retry count), never a copy captured at enqueue time.
//!
//! Adding and removing entries goes through [`LocalStore`](crate::LocalStore),
//! which keeps the snapshots consistent. Status changes are allowed directly.

use std::collections::VecDeque;

use optisync_types::{Event, EventId, EventStatus, SyncError};

/// A queued event and the state it was applied on.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry<S, P> {
    /// The latest version of the event record.
    pub event: Event<P>,
    /// Local state immediately before `event` was folded in.
    pub state_before: S,
    in_flight: bool,
}

impl<S, P> QueueEntry<S, P> {
    fn new(event: Event<P>, state_before: S) -> Self {
        Self {
            event,
            state_before,
            in_flight: false,
        }
    }

    /// Whether a submission for this event is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

/// Ordered queue of unconfirmed events.
#[derive(Debug, Clone)]
pub struct EventQueue<S, P> {
    entries: VecDeque<QueueEntry<S, P>>,
}

impl<S, P> Default for EventQueue<S, P> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<S, P: Clone> EventQueue<S, P> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, event: Event<P>, state_before: S) {
        self.entries.push_back(QueueEntry::new(event, state_before));
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Option<QueueEntry<S, P>> {
        self.entries.remove(index)
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut QueueEntry<S, P>> {
        self.entries.iter_mut()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry<S, P>> {
        self.entries.iter()
    }

    /// The oldest entry (its snapshot is the reconciliation base).
    pub fn oldest(&self) -> Option<&QueueEntry<S, P>> {
        self.entries.front()
    }

    /// Position of an event in the queue.
    pub fn position(&self, id: &EventId) -> Option<usize> {
        self.entries.iter().position(|e| e.event.id == *id)
    }

    /// Look up an entry by event id.
    pub fn get(&self, id: &EventId) -> Option<&QueueEntry<S, P>> {
        self.entries.iter().find(|e| e.event.id == *id)
    }

    fn get_mut(&mut self, id: &EventId) -> Option<&mut QueueEntry<S, P>> {
        self.entries.iter_mut().find(|e| e.event.id == *id)
    }

    /// Check if the queue holds this event.
    pub fn contains(&self, id: &EventId) -> bool {
        self.get(id).is_some()
    }

    /// Clones of all queued events, in queue order.
    pub fn events(&self) -> Vec<Event<P>> {
        self.entries.iter().map(|e| e.event.clone()).collect()
    }

    /// Change the status of a queued event.
    ///
    /// Returns `Ok(false)` if the event is not queued.
    pub fn set_status(&mut self, id: &EventId, status: EventStatus) -> Result<bool, SyncError> {
        match self.get_mut(id) {
            Some(entry) => {
                entry.event.transition(status)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Claim an event for submission.
    ///
    /// Returns the event to send, or `None` if it is gone or already in
    /// flight. A `FAILED` event is moved back to `PENDING` first.
    pub fn begin_submission(&mut self, id: &EventId) -> Option<Event<P>> {
        let entry = self.get_mut(id)?;
        if entry.in_flight || !entry.event.status.is_unconfirmed() {
            return None;
        }
        if entry.event.status == EventStatus::Failed {
            entry.event.status = EventStatus::Pending;
        }
        entry.in_flight = true;
        Some(entry.event.clone())
    }

    /// Record a failed submission.
    ///
    /// Marks the event `FAILED` and returns it so the caller can schedule a
    /// retry from its `retry_attempts`. `None` if the event is gone.
    pub fn fail_submission(&mut self, id: &EventId) -> Option<Event<P>> {
        let entry = self.get_mut(id)?;
        entry.in_flight = false;
        if entry.event.status == EventStatus::Pending {
            entry.event.status = EventStatus::Failed;
        }
        Some(entry.event.clone())
    }

    /// Prepare a failed event for its next retry.
    ///
    /// Increments `retry_attempts` and resets the status to `PENDING`.
    /// Returns `None` if the event is gone, in flight, or not `FAILED`.
    pub fn prepare_retry(&mut self, id: &EventId) -> Option<Event<P>> {
        let entry = self.get_mut(id)?;
        if entry.in_flight || entry.event.status != EventStatus::Failed {
            return None;
        }
        entry.event.retry_attempts = entry.event.retry_attempts.saturating_add(1);
        entry.event.status = EventStatus::Pending;
        Some(entry.event.clone())
    }

    /// Events a flush should submit: `PENDING` or `FAILED`, not in flight,
    /// ordered by ascending timestamp (ties keep queue order).
    pub fn flush_candidates(&self) -> Vec<EventId> {
        let mut candidates: Vec<&QueueEntry<S, P>> = self
            .entries
            .iter()
            .filter(|e| !e.in_flight && e.event.status.is_unconfirmed())
            .collect();
        candidates.sort_by_key(|e| e.event.timestamp);
        candidates.into_iter().map(|e| e.event.id).collect()
    }
}
