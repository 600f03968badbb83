//! Events - the unit of optimistic mutation.
//!
//! An [`Event`] is created when the application mutates state, folded into
//! local state immediately, and submitted to the backend. Its JSON form is the
//! body of `POST /event` and the `data` of realtime channel frames:
//!
//! ```json
//! {"id":"…","payload":{…},"timestamp":1705000000000,"clientId":"client_…","status":"PENDING","retryAttempts":0}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ClientId, EventId, SyncError};

/// Submission status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    /// Applied locally, not yet confirmed by the backend.
    #[default]
    Pending,
    /// Confirmed by the backend. Terminal.
    Acknowledged,
    /// Last submission failed; a retry is scheduled.
    Failed,
}

impl EventStatus {
    /// Whether the submission protocol allows moving from `self` to `next`.
    ///
    /// Allowed: `PENDING→ACKNOWLEDGED`, `PENDING→FAILED`, `FAILED→PENDING`.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Pending, EventStatus::Acknowledged)
                | (EventStatus::Pending, EventStatus::Failed)
                | (EventStatus::Failed, EventStatus::Pending)
        )
    }

    /// Whether an event in this status still needs to reach the backend.
    pub fn is_unconfirmed(self) -> bool {
        matches!(self, EventStatus::Pending | EventStatus::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Acknowledged => "ACKNOWLEDGED",
            EventStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A state mutation with its sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<P> {
    /// Globally unique, immutable id.
    pub id: EventId,
    /// Application-defined mutation.
    pub payload: P,
    /// Milliseconds since the Unix epoch, monotonic per originating client.
    pub timestamp: u64,
    /// Client that created the event.
    #[serde(rename = "clientId", alias = "originId")]
    pub origin: ClientId,
    /// Submission status.
    #[serde(default)]
    pub status: EventStatus,
    /// Number of retries performed so far.
    #[serde(default)]
    pub retry_attempts: u32,
}

impl<P> Event<P> {
    /// Create a new pending event with a fresh id.
    pub fn new(payload: P, origin: ClientId, timestamp: u64) -> Self {
        Self {
            id: EventId::new(),
            payload,
            timestamp,
            origin,
            status: EventStatus::Pending,
            retry_attempts: 0,
        }
    }

    /// Move the event to `next`, enforcing the submission protocol.
    pub fn transition(&mut self, next: EventStatus) -> Result<(), SyncError> {
        if !self.status.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

impl<P: Serialize> Event<P> {
    /// Serialize to a JSON value (the `POST /event` body).
    pub fn to_json(&self) -> Result<serde_json::Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize to a JSON string (realtime frame data).
    pub fn to_json_string(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<P: DeserializeOwned> Event<P> {
    /// Deserialize from a JSON string.
    pub fn from_json_str(data: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Issues strictly increasing millisecond timestamps for one client.
///
/// Wall-clock time is used when it moves forward; otherwise the previous
/// timestamp plus one.
#[derive(Debug, Clone, Default)]
pub struct EventClock {
    last: u64,
}

impl EventClock {
    /// Create a clock that has issued nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp based on the system clock.
    pub fn now(&mut self) -> u64 {
        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.observe(wall)
    }

    /// Next timestamp given an externally read wall-clock value.
    pub fn observe(&mut self, wall_ms: u64) -> u64 {
        let next = if wall_ms > self.last {
            wall_ms
        } else {
            self.last.saturating_add(1)
        };
        self.last = next;
        next
    }

    /// Last timestamp issued (0 if none).
    pub fn last(&self) -> u64 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> ClientId {
        ClientId::new("client_test").unwrap()
    }

    #[test]
    fn new_event_is_pending() {
        let event = Event::new(json!({"value": 5}), client(), 10);
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_attempts, 0);
        assert_eq!(event.timestamp, 10);
    }

    #[test]
    fn allowed_transitions() {
        assert!(EventStatus::Pending.can_transition_to(EventStatus::Acknowledged));
        assert!(EventStatus::Pending.can_transition_to(EventStatus::Failed));
        assert!(EventStatus::Failed.can_transition_to(EventStatus::Pending));
    }

    #[test]
    fn acknowledged_is_terminal() {
        for next in [
            EventStatus::Pending,
            EventStatus::Failed,
            EventStatus::Acknowledged,
        ] {
            assert!(!EventStatus::Acknowledged.can_transition_to(next));
        }
    }

    #[test]
    fn failed_cannot_be_acknowledged_directly() {
        let mut event = Event::new(json!(null), client(), 1);
        event.transition(EventStatus::Failed).unwrap();
        let err = event.transition(EventStatus::Acknowledged).unwrap_err();
        assert!(matches!(err, SyncError::InvalidTransition { .. }));
        assert_eq!(event.status, EventStatus::Failed);
    }

    #[test]
    fn json_uses_wire_field_names() {
        let mut event = Event::new(json!({"type": "add", "value": 5}), client(), 42);
        event.retry_attempts = 2;
        let value = event.to_json().unwrap();

        assert_eq!(value["clientId"], "client_test");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["retryAttempts"], 2);
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["payload"]["value"], 5);
        assert_eq!(value["id"], event.id.to_string());
    }

    #[test]
    fn parses_frame_without_status_or_attempts() {
        let id = EventId::new();
        let data = format!(
            r#"{{"id":"{id}","payload":{{"value":10}},"timestamp":7,"originId":"client_other"}}"#
        );
        let event: Event<serde_json::Value> = Event::from_json_str(&data).unwrap();

        assert_eq!(event.id, id);
        assert_eq!(event.origin.as_str(), "client_other");
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_attempts, 0);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let result = Event::<serde_json::Value>::from_json_str("{not json");
        assert!(matches!(result, Err(SyncError::Serialization(_))));
    }

    #[test]
    fn clock_is_strictly_monotonic() {
        let mut clock = EventClock::new();
        assert_eq!(clock.observe(100), 100);
        assert_eq!(clock.observe(100), 101);
        assert_eq!(clock.observe(50), 102);
        assert_eq!(clock.observe(500), 500);
        assert_eq!(clock.last(), 500);
    }

    #[test]
    fn clock_now_never_repeats() {
        let mut clock = EventClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
    }
}
