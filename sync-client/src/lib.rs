//! # sync-client
//!
//! Client library for optisync optimistic state synchronization.
//!
//! This is the main library that applications use to sync state.
//!
//! ## Features
//!
//! - **Optimistic apply**: mutations show up in local state immediately
//! - **Pending queue**: unconfirmed events survive failures and offline periods
//! - **Reconciliation**: remote events are rebased beneath pending local ones
//! - **Bounded backoff**: failed submissions retry at 1s, 2s, 4s ... 30s
//! - **Pluggable I/O**: backend, realtime channel and connectivity are traits
//!
//! ## Example
//!
//! ```ignore
//! use optisync_client::{HttpBackend, ManualConnectivity, MemoryHub, SyncClient, SyncConfig};
//!
//! let config = SyncConfig::new("todo").with_server_url("https://sync.example.com");
//! let backend = HttpBackend::from_config(&config)?;
//! let client = SyncClient::new(config, policy, backend, hub, ManualConnectivity::new(true))?;
//!
//! client.apply_event(json!({"type": "add", "value": 5}));
//! let state = client.state();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod events;
pub mod transport;

pub use backend::{
    Backend, BackendError, HttpBackend, MockBackend, ServerMerge, SubmittedEvent,
    APPLICATION_NAME_HEADER,
};
pub use client::{ClientError, SyncClient, SyncPayload, SyncState};
pub use config::{ConfigError, RetryConfig, SyncConfig};
pub use connectivity::{ConnectivityMonitor, ManualConnectivity};
pub use events::{ConnectionChange, ConnectionEvents, Unsubscribe};
pub use transport::{ChannelError, Inbound, MemoryHub, RealtimeChannel, RemoteFeed, HUB_CAPACITY};
