//! Identity types for optisync.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// A unique identifier for a locally applied event.
///
/// UUID v4 format (16 bytes). Assigned once when the event is created and
/// never changed afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(uuid::Uuid);

impl EventId {
    /// Create a new random EventId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create an EventId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this EventId.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for EventId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidData(format!("invalid event id {s:?}: {e}")))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

/// Prefix carried by every generated client id.
pub const CLIENT_ID_PREFIX: &str = "client_";

/// Identifies one running client instance on the realtime channel.
///
/// Generated ids are `client_` followed by 12 URL-safe base64 characters
/// (9 random bytes). Ids received from other clients are kept verbatim.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Create a new random ClientId.
    pub fn random() -> Self {
        let mut bytes = [0u8; 9];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(format!("{CLIENT_ID_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Wrap an existing client id.
    ///
    /// Returns `None` for empty or whitespace-only ids.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}
