//! SyncClient - the main interface for optisync.
//!
//! This module provides [`SyncClient`], the primary API for applications to
//! apply state mutations optimistically and keep them in sync with a backend
//! and other clients.
//!
//! # Architecture
//!
//! SyncClient keeps the store and the connectivity state machine (from
//! sync-core) behind one mutex and interprets their results to perform the
//! actual I/O via the Backend and RealtimeChannel traits.
//!
//! ```text
//! Application → SyncClient → Backend ──────→ REST service
//!                   ↓   ↑
//!                   ↓   RealtimeChannel ←── other clients
//!                   ↓
//!              sync-core (store, queue, backoff, connectivity)
//! ```
//!
//! The mutex is never held across an `.await`. Every submission, retry timer
//! and flush step runs as its own tokio task.
//!
//! # Example
//!
//! ```ignore
//! use optisync_client::{SyncClient, SyncConfig, MockBackend, MemoryHub, ManualConnectivity};
//!
//! let client = SyncClient::new(
//!     SyncConfig::new("todo"),
//!     policy,
//!     MockBackend::new(),
//!     MemoryHub::new(),
//!     ManualConnectivity::new(true),
//! )?;
//! client.ready().await;
//!
//! let id = client.apply_event(json!({"type": "add", "value": 5}));
//! let state = client.state();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use optisync_core::{
    flush_schedule, Action, ConnectivityEvent, ConnectivityState, LocalStore, MergePolicy,
    RetryPolicy,
};
use optisync_types::{ChannelMessage, ClientId, Event, EventClock, EventId, MergeDefinition, SyncError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::backend::{Backend, BackendError};
use crate::config::{ConfigError, SyncConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::events::{ConnectionChange, ConnectionEvents, Unsubscribe};
use crate::transport::{ChannelError, Inbound, RealtimeChannel, RemoteFeed};

/// Upper bound on initial state fetches while remote events keep arriving.
const MAX_INITIAL_FETCHES: u32 = 5;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No tokio runtime to run background tasks on.
    #[error("SyncClient must be created inside a tokio runtime")]
    NoRuntime,

    /// Backend error.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Realtime channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Model error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Application state the client can sync.
///
/// `Default` is the state used until (or if) the initial fetch succeeds.
pub trait SyncState: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> SyncState for T where T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Event payload the client can sync.
pub trait SyncPayload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> SyncPayload for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// The optimistic sync client.
///
/// Dropping the client stops every background task and retry timer.
pub struct SyncClient<S: SyncState, P: SyncPayload, B: Backend + 'static> {
    shared: Arc<Shared<S, P, B>>,
}

struct Shared<S, P, B> {
    client_id: ClientId,
    feed: RemoteFeed,
    backend: B,
    retry: RetryPolicy,
    stagger: Duration,
    events: ConnectionEvents,
    ready: watch::Sender<bool>,
    runtime: Handle,
    inner: Mutex<Inner<S, P>>,
}

struct Inner<S, P> {
    store: LocalStore<S, P>,
    clock: EventClock,
    connectivity: ConnectivityState,
    /// At most one timer per event; the generation tells a stale timer that
    /// it was replaced.
    retry_timers: HashMap<EventId, (u64, AbortHandle)>,
    next_timer: u64,
    tasks: Vec<AbortHandle>,
    /// The initial `GET /state` has not been applied yet.
    fetching: bool,
    /// A remote event was reconciled while `fetching`.
    remote_while_fetching: bool,
    shut_down: bool,
}

impl<S, P> Inner<S, P> {
    fn track(&mut self, task: AbortHandle) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    fn cancel_retry(&mut self, id: &EventId) {
        if let Some((_, timer)) = self.retry_timers.remove(id) {
            timer.abort();
        }
    }
}

impl<S: SyncState, P: SyncPayload, B: Backend + 'static> SyncClient<S, P, B> {
    /// Create a client and start synchronizing.
    ///
    /// Returns immediately. The initial fetch, merge registration and channel
    /// subscription run in the background; see [`ready`](Self::ready). The
    /// state is `S::default()` until the fetch resolves.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, an invalid merge definition, or when
    /// called outside a tokio runtime.
    pub fn new<C, M>(
        config: SyncConfig,
        policy: Arc<dyn MergePolicy<S, P>>,
        backend: B,
        channel: C,
        connectivity: M,
    ) -> Result<Self, ClientError>
    where
        C: RealtimeChannel + 'static,
        M: ConnectivityMonitor + 'static,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let client_id = match &config.client_id {
            Some(id) => ClientId::new(id.as_str())
                .ok_or_else(|| ConfigError::Invalid("client_id must not be blank".into()))?,
            None => ClientId::random(),
        };
        let definition = config
            .merge_definition
            .as_deref()
            .map(MergeDefinition::new)
            .transpose()?;

        let online = connectivity.is_online();
        let (ready, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            feed: RemoteFeed::new(client_id.clone()),
            client_id,
            backend,
            retry: config.retry.policy(),
            stagger: config.flush_stagger(),
            events: ConnectionEvents::new(),
            ready,
            runtime,
            inner: Mutex::new(Inner {
                store: LocalStore::new(policy, S::default()),
                clock: EventClock::new(),
                connectivity: ConnectivityState::new(online),
                retry_timers: HashMap::new(),
                next_timer: 0,
                tasks: Vec::new(),
                fetching: true,
                remote_while_fetching: false,
                shut_down: false,
            }),
        });

        tracing::info!(
            "Starting sync client {} for app '{}' ({})",
            shared.client_id,
            config.app_name,
            if online { "online" } else { "offline" }
        );

        let watcher = shared.spawn_connectivity_loop(connectivity);
        let init = shared.spawn_init(channel, config.channel.clone(), definition);
        {
            let mut inner = shared.lock();
            inner.track(watcher);
            inner.track(init);
        }

        Ok(Self { shared })
    }

    /// Optimistically apply a local event.
    ///
    /// The event is folded into local state and queued before this returns.
    /// When online it is also submitted to the backend.
    pub fn apply_event(&self, payload: P) -> EventId {
        let shared = &self.shared;
        let mut inner = shared.lock();

        let timestamp = inner.clock.now();
        let event = Event::new(payload, shared.client_id.clone(), timestamp);
        let id = inner.store.apply(event);
        tracing::debug!(
            "Applied event {} ({} pending)",
            id,
            inner.store.queue().len()
        );

        if inner.connectivity.is_online() && !inner.shut_down {
            shared.start_submission(&mut inner, id);
        }
        id
    }

    /// Snapshot of the current (optimistic) state.
    pub fn state(&self) -> S {
        self.shared.lock().store.state().clone()
    }

    /// Snapshot of the state without pending local events.
    pub fn confirmed_state(&self) -> S {
        self.shared.lock().store.confirmed().clone()
    }

    /// Submit every pending or failed event now.
    ///
    /// Returns `false` (and does nothing) while offline.
    pub fn force_sync(&self) -> bool {
        let emits = {
            let mut inner = self.shared.lock();
            if inner.shut_down {
                return false;
            }
            let (next, actions) = inner
                .connectivity
                .on_event(ConnectivityEvent::ForceSyncRequested);
            inner.connectivity = next;
            if actions.is_empty() {
                tracing::warn!("Cannot force sync while offline");
                return false;
            }
            self.shared.execute(&mut inner, actions)
        };
        self.shared.emit(emits);
        true
    }

    /// Register a connection-change listener.
    pub fn subscribe_to_connection_changes<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(ConnectionChange) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(listener)
    }

    /// This client's id on the realtime channel.
    pub fn client_id(&self) -> &ClientId {
        &self.shared.client_id
    }

    /// Current connectivity as seen by the engine.
    pub fn is_online(&self) -> bool {
        self.shared.lock().connectivity.is_online()
    }

    /// Number of unconfirmed events.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().store.queue().len()
    }

    /// Clones of the unconfirmed events, in application order.
    pub fn pending_events(&self) -> Vec<Event<P>> {
        self.shared.lock().store.queue().events()
    }

    /// Wait until the initial fetch, merge registration and channel
    /// subscription have completed (successfully or not).
    pub async fn ready(&self) {
        let mut rx = self.shared.ready.subscribe();
        // Err only if the sender is gone, which cannot outlive `self`
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Stop all background tasks and retry timers.
    ///
    /// Local state stays readable; no further submissions are made.
    pub fn shutdown(&self) {
        let mut inner = self.shared.lock();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        for (_, (_, timer)) in inner.retry_timers.drain() {
            timer.abort();
        }
        self.shared.ready.send_replace(true);
        tracing::info!("Sync client {} shut down", self.shared.client_id);
    }
}

impl<S: SyncState, P: SyncPayload, B: Backend + 'static> Drop for SyncClient<S, P, B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: SyncState, P: SyncPayload, B: Backend + 'static> std::fmt::Debug for SyncClient<S, P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("client_id", &self.shared.client_id)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl<S: SyncState, P: SyncPayload, B: Backend + 'static> Shared<S, P, B> {
    fn lock(&self) -> MutexGuard<'_, Inner<S, P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, changes: Vec<bool>) {
        for online in changes {
            self.events.emit(online);
        }
    }

    /// Run state machine actions. Returns the notifications to deliver once
    /// the lock is released.
    fn execute(self: &Arc<Self>, inner: &mut Inner<S, P>, actions: Vec<Action>) -> Vec<bool> {
        let mut emits = Vec::new();
        for action in actions {
            match action {
                Action::FlushQueue => self.flush(inner),
                Action::EmitConnectionChange { online } => emits.push(online),
            }
        }
        emits
    }

    fn on_connectivity(self: &Arc<Self>, online: bool) {
        let emits = {
            let mut inner = self.lock();
            if inner.shut_down {
                return;
            }
            let (next, actions) = inner
                .connectivity
                .on_event(ConnectivityEvent::observed(online));
            inner.connectivity = next;
            if actions.is_empty() {
                return;
            }
            if online {
                tracing::info!(
                    "Connection restored. Syncing {} pending events",
                    inner.store.queue().len()
                );
            } else {
                tracing::info!("Connection lost. Operating in offline mode");
            }
            self.execute(&mut inner, actions)
        };
        self.emit(emits);
    }

    /// Submit unconfirmed events in timestamp order, `stagger` apart.
    fn flush(self: &Arc<Self>, inner: &mut Inner<S, P>) {
        let candidates = inner.store.queue().flush_candidates();
        for (id, offset) in flush_schedule(&candidates, self.stagger) {
            if offset.is_zero() {
                self.start_submission(inner, id);
                continue;
            }
            let shared = Arc::clone(self);
            let task = self.runtime.spawn(async move {
                tokio::time::sleep(offset).await;
                let mut inner = shared.lock();
                if inner.shut_down || !inner.connectivity.is_online() {
                    return;
                }
                shared.start_submission(&mut inner, id);
            });
            inner.track(task.abort_handle());
        }
    }

    /// Claim an event and submit it in a background task.
    ///
    /// No-op if the event is gone or already in flight.
    fn start_submission(self: &Arc<Self>, inner: &mut Inner<S, P>, id: EventId) {
        let Some(event) = inner.store.queue_mut().begin_submission(&id) else {
            return;
        };
        inner.cancel_retry(&id);

        let body = match event.to_json() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to serialize event {}: {}", id, e);
                inner.store.queue_mut().fail_submission(&id);
                return;
            }
        };

        let shared = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            let result = shared.backend.submit_event(&body).await;
            shared.finish_submission(id, result);
        });
        inner.track(task.abort_handle());
    }

    fn finish_submission(self: &Arc<Self>, id: EventId, result: Result<(), BackendError>) {
        let mut inner = self.lock();
        if inner.shut_down {
            return;
        }
        match result {
            Ok(()) => {
                inner.cancel_retry(&id);
                if inner.store.acknowledge(&id).is_some() {
                    tracing::debug!(
                        "Event {} acknowledged ({} pending)",
                        id,
                        inner.store.queue().len()
                    );
                }
            }
            Err(e) => {
                tracing::warn!("Failed to sync event {}: {}", id, e);
                if let Some(event) = inner.store.queue_mut().fail_submission(&id) {
                    self.schedule_retry(&mut inner, id, event.retry_attempts);
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, inner: &mut Inner<S, P>, id: EventId, attempts: u32) {
        inner.cancel_retry(&id);

        let delay = self.retry.delay_for_attempt(attempts);
        let generation = inner.next_timer;
        inner.next_timer += 1;

        let shared = Arc::clone(self);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire_retry(id, generation);
        });
        inner.retry_timers.insert(id, (generation, timer.abort_handle()));
        tracing::debug!("Retry {} for event {} in {:?}", attempts + 1, id, delay);
    }

    fn fire_retry(self: &Arc<Self>, id: EventId, generation: u64) {
        let mut inner = self.lock();
        let current = matches!(inner.retry_timers.get(&id), Some((g, _)) if *g == generation);
        if !current {
            return;
        }
        inner.retry_timers.remove(&id);
        if inner.shut_down {
            return;
        }
        if !inner.connectivity.is_online() {
            tracing::debug!("Offline at retry of event {}, waiting for reconnect", id);
            return;
        }
        if inner.store.queue_mut().prepare_retry(&id).is_some() {
            self.start_submission(&mut inner, id);
        }
    }

    fn on_remote(&self, message: &ChannelMessage) {
        match self.feed.decode::<P>(message) {
            Inbound::Remote(event) => {
                let mut inner = self.lock();
                inner.store.reconcile(&event);
                if inner.fetching {
                    inner.remote_while_fetching = true;
                }
                tracing::debug!(
                    "Reconciled remote event {} from {} over {} pending",
                    event.id,
                    event.origin,
                    inner.store.queue().len()
                );
            }
            Inbound::Echo => tracing::debug!("Ignoring sync event from self"),
            Inbound::Ignored => tracing::trace!("Ignoring '{}' frame", message.name),
            Inbound::Malformed(e) => tracing::warn!("Dropping malformed sync message: {}", e),
        }
    }

    fn spawn_connectivity_loop<M: ConnectivityMonitor + 'static>(
        self: &Arc<Self>,
        monitor: M,
    ) -> AbortHandle {
        // Subscribe now so changes made before the task first runs are seen
        let mut rx = monitor.watch();
        let shared = Arc::clone(self);
        self.runtime
            .spawn(async move {
                let _monitor = monitor;
                while rx.changed().await.is_ok() {
                    let online = *rx.borrow_and_update();
                    shared.on_connectivity(online);
                }
            })
            .abort_handle()
    }

    fn spawn_init<C: RealtimeChannel + 'static>(
        self: &Arc<Self>,
        channel: C,
        channel_name: String,
        definition: Option<MergeDefinition>,
    ) -> AbortHandle {
        let shared = Arc::clone(self);
        self.runtime
            .spawn(async move {
                // Subscribe before fetching. Events delivered while the
                // fetch is outstanding make it run again.
                let subscribed = channel.subscribe(&channel_name).await;
                match subscribed {
                    Ok(rx) => shared.spawn_inbound_loop(channel, channel_name, rx),
                    Err(e) => tracing::error!("Failed to subscribe to '{}': {}", channel_name, e),
                }

                shared.fetch_initial_state().await;

                if let Some(definition) = definition {
                    match shared.backend.register_merge(&definition).await {
                        Ok(()) => tracing::debug!("Merge definition registered"),
                        Err(e) => tracing::warn!("Error registering merge function: {}", e),
                    }
                }

                shared.ready.send_replace(true);
            })
            .abort_handle()
    }

    fn spawn_inbound_loop<C: RealtimeChannel + 'static>(
        self: &Arc<Self>,
        channel: C,
        channel_name: String,
        mut rx: tokio::sync::mpsc::Receiver<ChannelMessage>,
    ) {
        let shared = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            let _channel = channel;
            while let Some(message) = rx.recv().await {
                shared.on_remote(&message);
            }
            tracing::debug!("Realtime channel '{}' closed", channel_name);
        });

        let mut inner = self.lock();
        if inner.shut_down {
            task.abort();
        } else {
            inner.track(task.abort_handle());
        }
    }

    /// Fetch the authoritative state and rebase onto it.
    ///
    /// A snapshot may predate remote events already reconciled here. The
    /// server publishes only after accepting, so fetching again once such an
    /// event has arrived yields a snapshot that contains it.
    async fn fetch_initial_state(&self) {
        for attempt in 1..=MAX_INITIAL_FETCHES {
            let fetched = match self.backend.fetch_state().await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Error fetching initial state: {}", e);
                    break;
                }
            };
            let state = match serde_json::from_value::<S>(fetched) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("Error decoding initial state: {}", e);
                    break;
                }
            };

            let refetch = {
                let mut inner = self.lock();
                let raced = std::mem::take(&mut inner.remote_while_fetching);
                if raced && attempt < MAX_INITIAL_FETCHES {
                    true
                } else {
                    if raced {
                        tracing::warn!(
                            "Remote events still arriving after {} state fetches, using the last one",
                            attempt
                        );
                    }
                    inner.store.rebase(state);
                    inner.fetching = false;
                    tracing::debug!(
                        "Initial state fetched ({} pending replayed)",
                        inner.store.queue().len()
                    );
                    false
                }
            };
            if !refetch {
                return;
            }
            tracing::debug!("Remote events arrived during state fetch {}, fetching again", attempt);
        }
        let mut inner = self.lock();
        inner.fetching = false;
        inner.remote_while_fetching = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::connectivity::ManualConnectivity;
    use crate::transport::MemoryHub;
    use optisync_types::EventStatus;
    use serde_json::{json, Value};

    type TestClient = SyncClient<Value, Value, MockBackend>;

    /// `(s, e) => ({ total: s.total + e.value })`
    fn totals_policy() -> Arc<dyn MergePolicy<Value, Value>> {
        Arc::new(|s: &Value, e: &Event<Value>| {
            let total = s["total"].as_i64().unwrap_or(0);
            let value = e.payload["value"].as_i64().unwrap_or(0);
            json!({ "total": total + value })
        })
    }

    fn totals_backend(initial: Value) -> MockBackend {
        let backend = MockBackend::with_state(initial);
        backend.set_merge(|state, event| {
            let total = state["total"].as_i64().unwrap_or(0);
            let value = event["payload"]["value"].as_i64().unwrap_or(0);
            json!({ "total": total + value })
        });
        backend
    }

    struct Harness {
        client: TestClient,
        backend: MockBackend,
        hub: MemoryHub,
        net: ManualConnectivity,
    }

    async fn harness_with(config: SyncConfig, backend: MockBackend, online: bool) -> Harness {
        let hub = MemoryHub::new();
        backend.connect_hub(hub.clone(), &config.channel);
        let net = ManualConnectivity::new(online);
        let client = SyncClient::new(
            config,
            totals_policy(),
            backend.clone(),
            hub.clone(),
            net.clone(),
        )
        .unwrap();
        client.ready().await;
        Harness {
            client,
            backend,
            hub,
            net,
        }
    }

    async fn harness(online: bool) -> Harness {
        harness_with(
            SyncConfig::new("test").with_client_id("client_local"),
            totals_backend(json!({"total": 0})),
            online,
        )
        .await
    }

    /// Let spawned tasks run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn add(value: i64) -> Value {
        json!({"type": "add", "value": value})
    }

    fn remote_frame(value: i64) -> ChannelMessage {
        let origin = ClientId::new("client_other").unwrap();
        let event = Event::new(json!({ "value": value }), origin, 1);
        ChannelMessage::for_event(&event, 1).unwrap()
    }

    fn ids(backend: &MockBackend) -> Vec<String> {
        backend
            .submitted()
            .iter()
            .filter_map(|s| s.id().map(str::to_string))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn offline_apply_is_optimistic() {
        let h = harness(false).await;

        let id = h.client.apply_event(add(5));

        assert_eq!(h.client.state(), json!({"total": 5}));
        assert_eq!(h.client.pending_count(), 1);
        assert_eq!(h.client.pending_events()[0].id, id);
        assert_eq!(h.client.pending_events()[0].status, EventStatus::Pending);

        settle().await;
        assert!(h.backend.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_flushes_in_apply_order() {
        let h = harness(false).await;
        let a = h.client.apply_event(add(5));
        let b = h.client.apply_event(add(3));

        h.net.set_online(true);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(ids(&h.backend), vec![a.to_string(), b.to_string()]);
        let submitted = h.backend.submitted();
        let gap = submitted[1].at - submitted[0].at;
        assert_eq!(gap, Duration::from_millis(100));

        assert_eq!(h.client.pending_count(), 0);
        assert_eq!(h.client.state(), json!({"total": 8}));
        assert_eq!(h.backend.state(), json!({"total": 8}));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_event_during_initial_fetch_is_kept() {
        let backend = totals_backend(json!({"total": 0}));
        backend.set_fetch_latency(Duration::from_millis(50));
        let hub = MemoryHub::new();
        backend.connect_hub(hub.clone(), "events");
        let client = SyncClient::new(
            SyncConfig::new("test").with_client_id("client_local"),
            totals_policy(),
            backend.clone(),
            hub.clone(),
            ManualConnectivity::new(true),
        )
        .unwrap();

        // First fetch has read {total: 0}; another client's event lands now
        tokio::time::sleep(Duration::from_millis(10)).await;
        let origin = ClientId::new("client_other").unwrap();
        let event = Event::new(add(10), origin, 1);
        backend.submit_event(&event.to_json().unwrap()).await.unwrap();
        settle().await;
        assert_eq!(client.state(), json!({"total": 10}));

        client.ready().await;
        assert_eq!(backend.fetch_count(), 2);
        assert_eq!(client.state(), json!({"total": 10}));
        assert_eq!(client.confirmed_state(), json!({"total": 10}));
        assert_eq!(client.state(), backend.state());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_initial_fetch_runs_once() {
        let backend = totals_backend(json!({"total": 3}));
        backend.set_fetch_latency(Duration::from_millis(50));
        let h = harness_with(
            SyncConfig::new("test").with_client_id("client_local"),
            backend,
            true,
        )
        .await;

        assert_eq!(h.backend.fetch_count(), 1);
        assert_eq!(h.client.state(), json!({"total": 3}));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_event_is_rebased_under_pending() {
        let h = harness(false).await;
        h.client.apply_event(add(5));

        h.hub.broadcast("events", remote_frame(10));
        settle().await;

        assert_eq!(h.client.state(), json!({"total": 15}));
        assert_eq!(h.client.confirmed_state(), json!({"total": 10}));
        assert_eq!(h.client.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_event_with_empty_queue_folds_onto_state() {
        let h = harness(true).await;

        h.hub.broadcast("events", remote_frame(4));
        settle().await;

        assert_eq!(h.client.state(), json!({"total": 4}));
    }

    #[tokio::test(start_paused = true)]
    async fn own_echo_does_not_change_state() {
        let h = harness(true).await;

        // Accepted submission is fanned back out to this client
        h.client.apply_event(add(5));
        settle().await;
        assert_eq!(h.backend.accepted().len(), 1);
        assert_eq!(h.client.state(), json!({"total": 5}));

        // A frame published under our id is ignored even if it is new
        let mine = Event::new(json!({"value": 100}), h.client.client_id().clone(), 1);
        h.hub
            .broadcast("events", ChannelMessage::for_event(&mine, 1).unwrap());
        settle().await;

        assert_eq!(h.client.state(), json!({"total": 5}));
        assert_eq!(h.client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_and_foreign_frames_are_dropped() {
        let h = harness(false).await;
        h.client.apply_event(add(1));

        h.hub.broadcast(
            "events",
            ChannelMessage {
                name: "event".into(),
                data: "{not json".into(),
                timestamp: 1,
                client_id: ClientId::new("client_other"),
            },
        );
        h.hub.broadcast(
            "events",
            ChannelMessage {
                name: "presence".into(),
                data: "{}".into(),
                timestamp: 1,
                client_id: None,
            },
        );
        settle().await;

        assert_eq!(h.client.state(), json!({"total": 1}));
        assert_eq!(h.client.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clients_converge() {
        let backend = totals_backend(json!({"total": 0}));
        let hub = MemoryHub::new();
        backend.connect_hub(hub.clone(), "events");
        let net = ManualConnectivity::new(true);

        let make = |name: &str| {
            SyncClient::new(
                SyncConfig::new("test").with_client_id(name),
                totals_policy(),
                backend.clone(),
                hub.clone(),
                net.clone(),
            )
            .unwrap()
        };
        let first: TestClient = make("client_first");
        let second: TestClient = make("client_second");
        first.ready().await;
        second.ready().await;

        first.apply_event(add(5));
        second.apply_event(add(3));
        settle().await;

        assert_eq!(first.state(), json!({"total": 8}));
        assert_eq!(second.state(), json!({"total": 8}));
        assert_eq!(backend.state(), json!({"total": 8}));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_submission_retries_with_backoff() {
        let h = harness(true).await;
        h.backend.fail_next_submits(2);

        let id = h.client.apply_event(add(5));
        settle().await;

        let pending = h.client.pending_events();
        assert_eq!(pending[0].status, EventStatus::Failed);
        assert_eq!(pending[0].retry_attempts, 0);
        // Optimistic state survives failure
        assert_eq!(h.client.state(), json!({"total": 5}));

        tokio::time::sleep(Duration::from_secs(4)).await;

        let submitted = h.backend.submitted();
        assert_eq!(h.backend.submission_count(&id.to_string()), 3);
        let first_gap = submitted[1].at - submitted[0].at;
        let second_gap = submitted[2].at - submitted[1].at;
        assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2100));

        assert_eq!(submitted[2].event["retryAttempts"], json!(2));
        assert_eq!(h.client.pending_count(), 0);
        assert_eq!(h.client.state(), json!({"total": 5}));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_while_offline_waits_for_reconnect() {
        let h = harness(true).await;
        h.backend.fail_next_submits(1);
        h.client.apply_event(add(5));
        settle().await;

        h.net.set_online(false);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.backend.submitted().len(), 1);
        assert_eq!(h.client.pending_events()[0].status, EventStatus::Failed);

        h.net.set_online(true);
        settle().await;

        assert_eq!(h.backend.submitted().len(), 2);
        assert_eq!(h.client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_skips_in_flight_events() {
        let h = harness(true).await;
        h.backend.set_latency(Duration::from_millis(500));

        let id = h.client.apply_event(add(5));
        settle().await;
        assert!(h.client.force_sync());

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.backend.submission_count(&id.to_string()), 1);
        assert_eq!(h.client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledgment_cancels_pending_retry() {
        let h = harness(true).await;
        h.backend.fail_next_submits(1);
        let id = h.client.apply_event(add(5));
        settle().await;

        // Resubmitted before the 1s retry timer fires
        assert!(h.client.force_sync());
        settle().await;
        assert_eq!(h.client.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.backend.submission_count(&id.to_string()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_orders_by_timestamp() {
        let h = harness(true).await;
        h.backend.fail_next_submits(3);
        let a = h.client.apply_event(add(1));
        let b = h.client.apply_event(add(2));
        let c = h.client.apply_event(add(3));
        settle().await;

        assert!(h.client.force_sync());
        tokio::time::sleep(Duration::from_millis(500)).await;

        let order: Vec<String> = ids(&h.backend).into_iter().skip(3).collect();
        assert_eq!(order, vec![a.to_string(), b.to_string(), c.to_string()]);
        assert_eq!(h.client.state(), json!({"total": 6}));
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_offline_returns_false() {
        let h = harness(false).await;
        h.client.apply_event(add(5));

        assert!(!h.client.force_sync());
        settle().await;
        assert!(h.backend.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connection_listeners_see_transitions() {
        let h = harness(true).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = h
            .client
            .subscribe_to_connection_changes(move |change| sink.lock().unwrap().push(change.is_online));

        h.net.set_online(false);
        settle().await;
        h.net.set_online(true);
        settle().await;
        assert!(h.client.force_sync());

        assert_eq!(*seen.lock().unwrap(), vec![false, true, true]);
        assert!(h.client.is_online());

        handle.unsubscribe();
        h.net.set_online(false);
        settle().await;
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(!h.client.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn fetched_state_becomes_base() {
        let h = harness_with(
            SyncConfig::new("test"),
            totals_backend(json!({"total": 100})),
            false,
        )
        .await;

        assert_eq!(h.client.state(), json!({"total": 100}));
        h.client.apply_event(add(5));
        assert_eq!(h.client.state(), json!({"total": 105}));
        assert_eq!(h.backend.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_starts_from_default() {
        let backend = totals_backend(json!({"total": 100}));
        backend.fail_next_fetch("down");
        let h = harness_with(SyncConfig::new("test"), backend, false).await;

        assert_eq!(h.client.state(), Value::Null);
        h.client.apply_event(add(5));
        assert_eq!(h.client.state(), json!({"total": 5}));
    }

    #[tokio::test(start_paused = true)]
    async fn merge_definition_is_registered() {
        let config = SyncConfig::new("test").with_merge_definition("(s, e) => s");
        let h = harness_with(config, totals_backend(json!({"total": 0})), true).await;

        assert_eq!(
            h.backend.registered(),
            vec![MergeDefinition::new("(s, e) => s").unwrap()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_registration_is_not_fatal() {
        let backend = totals_backend(json!({"total": 0}));
        backend.fail_next_register("nope");
        let config = SyncConfig::new("test").with_merge_definition("(s, e) => s");
        let h = harness_with(config, backend, true).await;

        assert!(h.backend.registered().is_empty());
        h.client.apply_event(add(2));
        settle().await;
        assert_eq!(h.client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_retries() {
        let h = harness(true).await;
        h.backend.fail_next_submits(5);
        h.client.apply_event(add(5));
        settle().await;

        h.client.shutdown();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.backend.submitted().len(), 1);
        assert_eq!(h.client.state(), json!({"total": 5}));
        assert!(!h.client.force_sync());
    }

    #[tokio::test]
    async fn generated_client_id_has_prefix() {
        let h = harness_with(
            SyncConfig::new("test"),
            totals_backend(json!({"total": 0})),
            true,
        )
        .await;
        assert!(h.client.client_id().as_str().starts_with("client_"));
    }

    #[tokio::test]
    async fn blank_client_id_is_rejected() {
        let result: Result<TestClient, _> = SyncClient::new(
            SyncConfig::new("test").with_client_id("   "),
            totals_policy(),
            MockBackend::new(),
            MemoryHub::new(),
            ManualConnectivity::new(true),
        );
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn invalid_merge_definition_is_rejected() {
        let result: Result<TestClient, _> = SyncClient::new(
            SyncConfig::new("test").with_merge_definition(""),
            totals_policy(),
            MockBackend::new(),
            MemoryHub::new(),
            ManualConnectivity::new(true),
        );
        assert!(matches!(
            result,
            Err(ClientError::Sync(SyncError::InvalidMergeDefinition(_)))
        ));
    }

    #[test]
    fn requires_runtime() {
        let result: Result<TestClient, _> = SyncClient::new(
            SyncConfig::new("test"),
            totals_policy(),
            MockBackend::new(),
            MemoryHub::new(),
            ManualConnectivity::new(true),
        );
        assert!(matches!(result, Err(ClientError::NoRuntime)));
    }
}
