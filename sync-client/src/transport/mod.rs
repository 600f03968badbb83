//! Realtime channel abstraction for optisync.
//!
//! Remote events reach a client through a named publish/subscribe channel.
//! This module provides a pluggable channel layer so the engine never talks
//! to a particular pub/sub service directly.
//!
//! # Design
//!
//! The channel trait is async and frame-oriented:
//! - `subscribe()` returns a stream of [`ChannelMessage`] frames
//! - `publish()` sends one frame to every subscriber of a channel
//!
//! Frames are decoded and filtered by [`RemoteFeed`] before they reach the
//! reconciliation engine.
//!
//! # Example
//!
//! ```ignore
//! let hub = MemoryHub::new();
//! let mut rx = hub.subscribe("events").await?;
//! hub.publish("events", frame).await?;
//! let received = rx.recv().await;
//! ```

mod feed;
mod memory;

pub use feed::{Inbound, RemoteFeed};
pub use memory::{MemoryHub, HUB_CAPACITY};

use async_trait::async_trait;
use optisync_types::ChannelMessage;
use thiserror::Error;
use tokio::sync::mpsc;

/// Realtime channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Subscription could not be established.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Publish failed.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Channel closed.
    #[error("channel closed")]
    Closed,
}

/// Publish/subscribe channel carrying event frames between clients.
///
/// Implementations handle the underlying service (hosted pub/sub,
/// in-memory hub for tests and simulation, etc).
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Subscribe to a named channel.
    ///
    /// Frames published after this call returns are delivered in publish
    /// order. The receiver yields `None` once the channel is gone.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelMessage>, ChannelError>;

    /// Publish a frame to every subscriber of a named channel.
    async fn publish(&self, channel: &str, message: ChannelMessage) -> Result<(), ChannelError>;
}

#[async_trait]
impl<T: RealtimeChannel + ?Sized> RealtimeChannel for std::sync::Arc<T> {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelMessage>, ChannelError> {
        (**self).subscribe(channel).await
    }

    async fn publish(&self, channel: &str, message: ChannelMessage) -> Result<(), ChannelError> {
        (**self).publish(channel, message).await
    }
}
