//! Connectivity state machine for optisync.
//!
//! This module provides a pure, side-effect-free state machine for reacting
//! to online/offline transitions. It takes events as input and produces a
//! new state plus a list of actions to execute.
//!
//! The actual I/O (submitting queued events, notifying listeners) is
//! performed by sync-client, not by this module.

/// Online/offline state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Submissions are allowed.
    Online,
    /// Submissions are paused; optimistic state is retained.
    Offline,
}

impl ConnectivityState {
    /// Create a state machine from the currently observed status.
    pub fn new(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // Connectivity restored: flush the queue, then tell listeners
            (Self::Offline, Event::WentOnline) => (
                Self::Online,
                vec![
                    Action::FlushQueue,
                    Action::EmitConnectionChange { online: true },
                ],
            ),

            (Self::Online, Event::WentOffline) => (
                Self::Offline,
                vec![Action::EmitConnectionChange { online: false }],
            ),

            (Self::Online, Event::ForceSyncRequested) => (
                Self::Online,
                vec![
                    Action::FlushQueue,
                    Action::EmitConnectionChange { online: true },
                ],
            ),

            // Repeated reports of the same status, or force sync while offline
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently online.
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Inputs to the connectivity state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The environment reported connectivity.
    WentOnline,
    /// The environment reported loss of connectivity.
    WentOffline,
    /// The application asked for an immediate flush.
    ForceSyncRequested,
}

impl Event {
    /// Map an observed online flag to an event.
    pub fn observed(online: bool) -> Self {
        if online {
            Self::WentOnline
        } else {
            Self::WentOffline
        }
    }
}

/// Actions to be executed by the sync-client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Submit every unconfirmed, not-in-flight event, staggered, in
    /// ascending timestamp order.
    FlushQueue,
    /// Notify connection-change listeners.
    EmitConnectionChange {
        /// New connectivity status.
        online: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_from_observed_status() {
        assert!(ConnectivityState::new(true).is_online());
        assert!(!ConnectivityState::new(false).is_online());
    }

    #[test]
    fn going_online_flushes_then_emits() {
        let (state, actions) = ConnectivityState::Offline.on_event(Event::WentOnline);

        assert_eq!(state, ConnectivityState::Online);
        assert_eq!(
            actions,
            vec![
                Action::FlushQueue,
                Action::EmitConnectionChange { online: true }
            ]
        );
    }

    #[test]
    fn going_offline_only_emits() {
        let (state, actions) = ConnectivityState::Online.on_event(Event::WentOffline);

        assert_eq!(state, ConnectivityState::Offline);
        assert_eq!(actions, vec![Action::EmitConnectionChange { online: false }]);
    }

    #[test]
    fn same_status_is_ignored() {
        let (state, actions) = ConnectivityState::Online.on_event(Event::WentOnline);
        assert_eq!(state, ConnectivityState::Online);
        assert!(actions.is_empty());

        let (state, actions) = ConnectivityState::Offline.on_event(Event::WentOffline);
        assert_eq!(state, ConnectivityState::Offline);
        assert!(actions.is_empty());
    }

    #[test]
    fn force_sync_online_flushes() {
        let (state, actions) = ConnectivityState::Online.on_event(Event::ForceSyncRequested);
        assert!(state.is_online());
        assert!(actions.contains(&Action::FlushQueue));
    }

    #[test]
    fn force_sync_offline_does_nothing() {
        let (state, actions) = ConnectivityState::Offline.on_event(Event::ForceSyncRequested);
        assert!(!state.is_online());
        assert!(actions.is_empty());
    }

    #[test]
    fn observed_maps_flags() {
        assert_eq!(Event::observed(true), Event::WentOnline);
        assert_eq!(Event::observed(false), Event::WentOffline);
    }
}
