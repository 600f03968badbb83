//! # sync-types
//!
//! Wire format types for optisync optimistic state synchronization.
//!
//! This crate provides the foundational types used across all optisync crates:
//! - [`EventId`], [`ClientId`] - Identity types
//! - [`Event`], [`EventStatus`], [`EventClock`] - The optimistic mutation and its lifecycle
//! - [`ChannelMessage`] - Realtime channel frame
//! - [`MergeDefinition`] - Serialized merge policy for backend registration
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod ids;
mod messages;

pub use error::SyncError;
pub use event::{Event, EventClock, EventStatus};
pub use ids::{ClientId, EventId, CLIENT_ID_PREFIX};
pub use messages::{ChannelMessage, MergeDefinition, EVENT_MESSAGE_NAME, MAX_MERGE_DEFINITION_LEN};
