//! Realtime channel frames and backend request bodies.

use serde::{Deserialize, Serialize};

use crate::{ClientId, Event, SyncError};

/// Frame name used for event broadcasts on the realtime channel.
pub const EVENT_MESSAGE_NAME: &str = "event";

/// A frame delivered over the realtime channel.
///
/// `data` carries a JSON-encoded [`Event`]; `timestamp` is assigned by the
/// transport (milliseconds since the Unix epoch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    /// Frame name (`"event"` for event broadcasts).
    pub name: String,
    /// Raw frame body.
    pub data: String,
    /// Transport timestamp.
    pub timestamp: u64,
    /// Publishing client, when the transport reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl ChannelMessage {
    /// Build an event broadcast frame.
    pub fn for_event<P: Serialize>(event: &Event<P>, timestamp: u64) -> Result<Self, SyncError> {
        Ok(Self {
            name: EVENT_MESSAGE_NAME.to_string(),
            data: event.to_json_string()?,
            timestamp,
            client_id: Some(event.origin.clone()),
        })
    }

    /// Whether this frame is an event broadcast.
    pub fn is_event(&self) -> bool {
        self.name == EVENT_MESSAGE_NAME
    }
}

/// Largest merge definition accepted for registration (64 KiB).
pub const MAX_MERGE_DEFINITION_LEN: usize = 64 * 1024;

/// Serialized merge policy registered with the backend.
///
/// This is opaque text for server-side replay. It is validated here and
/// never evaluated by the client; the client always merges with the typed
/// policy it was constructed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDefinition {
    function: String,
}

impl MergeDefinition {
    /// Validate and wrap a merge definition.
    pub fn new(function: impl Into<String>) -> Result<Self, SyncError> {
        let function = function.into();
        if function.trim().is_empty() {
            return Err(SyncError::InvalidMergeDefinition("empty definition".into()));
        }
        if function.len() > MAX_MERGE_DEFINITION_LEN {
            return Err(SyncError::InvalidMergeDefinition(format!(
                "definition is {} bytes (max {})",
                function.len(),
                MAX_MERGE_DEFINITION_LEN
            )));
        }
        if function.contains('\0') {
            return Err(SyncError::InvalidMergeDefinition(
                "definition contains NUL byte".into(),
            ));
        }
        Ok(Self { function })
    }

    /// The definition text.
    pub fn as_str(&self) -> &str {
        &self.function
    }
}
