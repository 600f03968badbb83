//! In-process realtime channel.
//!
//! Every named channel is a tokio broadcast channel. Clones share the same
//! channels, so several clients in one process (tests, `optisync simulate`)
//! see each other's frames.

use super::{ChannelError, RealtimeChannel};
use async_trait::async_trait;
use optisync_types::ChannelMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};

/// Per-channel buffer; slower subscribers skip frames beyond this.
pub const HUB_CAPACITY: usize = 256;

/// In-memory publish/subscribe hub.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<ChannelMessage>>>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<ChannelMessage> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(HUB_CAPACITY).0)
            .clone()
    }

    /// Deliver a frame without awaiting.
    ///
    /// Returns the number of subscribers that will receive it.
    pub fn broadcast(&self, channel: &str, message: ChannelMessage) -> usize {
        self.sender(channel).send(message).unwrap_or(0)
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RealtimeChannel for MemoryHub {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<ChannelMessage>, ChannelError> {
        let mut source = self.sender(channel).subscribe();
        let (tx, rx) = mpsc::channel(HUB_CAPACITY);
        let name = channel.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    received = source.recv() => match received {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Subscriber on '{}' lagged, skipped {} frames", name, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(rx)
    }

    async fn publish(&self, channel: &str, message: ChannelMessage) -> Result<(), ChannelError> {
        let delivered = self.broadcast(channel, message);
        tracing::trace!("Published frame on '{}' to {} subscribers", channel, delivered);
        Ok(())
    }
}
