//! Mock backend for testing and simulation.
//!
//! Keeps an authoritative JSON state, folds accepted events into it with a
//! server-side merge function, and records every request for verification.
//! Failures can be injected per call. When connected to a [`MemoryHub`],
//! accepted events are broadcast on the realtime channel the way a hosted
//! backend would.

use super::{Backend, BackendError};
use crate::transport::MemoryHub;
use async_trait::async_trait;
use optisync_types::{ChannelMessage, ClientId, MergeDefinition, EVENT_MESSAGE_NAME};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Server-side merge: `(state, event_json) -> state`.
pub type ServerMerge = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// One `submit_event` call as seen by the mock.
#[derive(Debug, Clone)]
pub struct SubmittedEvent {
    /// Request body.
    pub event: Value,
    /// When the request arrived.
    pub at: Instant,
    /// Whether the mock acknowledged it.
    pub accepted: bool,
}

impl SubmittedEvent {
    /// The submitted event's id, if present.
    pub fn id(&self) -> Option<&str> {
        self.event.get("id").and_then(Value::as_str)
    }
}

/// Mock backend for testing.
///
/// Clones share state, so a test can keep one handle while the client owns
/// another.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockBackendInner>>,
}

#[derive(Default)]
struct MockBackendInner {
    state: Value,
    merge: Option<ServerMerge>,
    submitted: Vec<SubmittedEvent>,
    registered: Vec<MergeDefinition>,
    fetch_count: usize,
    latency: Option<Duration>,
    fetch_latency: Option<Duration>,
    unreachable: bool,
    fail_next_fetch: Option<String>,
    fail_next_register: Option<String>,
    fail_submits: usize,
    fanout: Option<(MemoryHub, String)>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MockBackend")
            .field("state", &inner.state)
            .field("submitted", &inner.submitted.len())
            .field("unreachable", &inner.unreachable)
            .finish_non_exhaustive()
    }
}

impl MockBackend {
    /// Create a mock with `Value::Null` state and no server merge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock with an initial state.
    pub fn with_state(state: Value) -> Self {
        let backend = Self::new();
        backend.lock().state = state;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockBackendInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold accepted events into the authoritative state with `merge`.
    pub fn set_merge<F>(&self, merge: F)
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.lock().merge = Some(Arc::new(merge));
    }

    /// Broadcast accepted events on `channel` of `hub`.
    pub fn connect_hub(&self, hub: MemoryHub, channel: &str) {
        self.lock().fanout = Some((hub, channel.to_string()));
    }

    /// Delay every submission response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Delay every `fetch_state()` response by `latency`.
    ///
    /// The state is read when the request arrives, so submissions accepted
    /// while the response is delayed are not in it.
    pub fn set_fetch_latency(&self, latency: Duration) {
        self.lock().fetch_latency = Some(latency);
    }

    /// Make every call fail with a network error until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Cause the next `fetch_state()` to fail with the given error.
    pub fn fail_next_fetch(&self, error: &str) {
        self.lock().fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next `register_merge()` to fail with the given error.
    pub fn fail_next_register(&self, error: &str) {
        self.lock().fail_next_register = Some(error.to_string());
    }

    /// Reject the next `count` submissions with status 503.
    pub fn fail_next_submits(&self, count: usize) {
        self.lock().fail_submits = count;
    }

    /// Replace the authoritative state.
    pub fn set_state(&self, state: Value) {
        self.lock().state = state;
    }

    /// Current authoritative state.
    pub fn state(&self) -> Value {
        self.lock().state.clone()
    }

    /// Every submission received, in arrival order.
    pub fn submitted(&self) -> Vec<SubmittedEvent> {
        self.lock().submitted.clone()
    }

    /// Submissions that were acknowledged.
    pub fn accepted(&self) -> Vec<SubmittedEvent> {
        self.lock()
            .submitted
            .iter()
            .filter(|s| s.accepted)
            .cloned()
            .collect()
    }

    /// Number of submissions received for one event id.
    pub fn submission_count(&self, id: &str) -> usize {
        self.lock()
            .submitted
            .iter()
            .filter(|s| s.id() == Some(id))
            .count()
    }

    /// Merge definitions registered so far.
    pub fn registered(&self) -> Vec<MergeDefinition> {
        self.lock().registered.clone()
    }

    /// Number of `fetch_state()` calls.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetch_count
    }
}

fn event_frame(event: &Value) -> ChannelMessage {
    ChannelMessage {
        name: EVENT_MESSAGE_NAME.to_string(),
        data: event.to_string(),
        timestamp: event.get("timestamp").and_then(Value::as_u64).unwrap_or(0),
        client_id: event
            .get("clientId")
            .and_then(Value::as_str)
            .and_then(ClientId::new),
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_state(&self) -> Result<Value, BackendError> {
        let (snapshot, latency) = {
            let mut inner = self.lock();
            inner.fetch_count += 1;

            if inner.unreachable {
                return Err(BackendError::Network("backend unreachable".into()));
            }
            if let Some(error) = inner.fail_next_fetch.take() {
                return Err(BackendError::Network(error));
            }
            (inner.state.clone(), inner.fetch_latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(snapshot)
    }

    async fn register_merge(&self, definition: &MergeDefinition) -> Result<(), BackendError> {
        let mut inner = self.lock();

        if inner.unreachable {
            return Err(BackendError::Network("backend unreachable".into()));
        }
        if let Some(error) = inner.fail_next_register.take() {
            return Err(BackendError::Rejected {
                status: 400,
                body: error,
            });
        }
        inner.registered.push(definition.clone());
        Ok(())
    }

    async fn submit_event(&self, event: &Value) -> Result<(), BackendError> {
        let at = Instant::now();
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fanout = {
            let mut inner = self.lock();

            if inner.unreachable {
                inner.submitted.push(SubmittedEvent {
                    event: event.clone(),
                    at,
                    accepted: false,
                });
                return Err(BackendError::Network("backend unreachable".into()));
            }
            if inner.fail_submits > 0 {
                inner.fail_submits -= 1;
                inner.submitted.push(SubmittedEvent {
                    event: event.clone(),
                    at,
                    accepted: false,
                });
                return Err(BackendError::Rejected {
                    status: 503,
                    body: "injected failure".into(),
                });
            }

            if let Some(merge) = inner.merge.clone() {
                let next = merge(&inner.state, event);
                inner.state = next;
            }
            inner.submitted.push(SubmittedEvent {
                event: event.clone(),
                at,
                accepted: true,
            });
            inner.fanout.clone()
        };

        if let Some((hub, channel)) = fanout {
            hub.broadcast(&channel, event_frame(event));
        }
        Ok(())
    }
}
