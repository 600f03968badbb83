//! Error types for optisync.

use thiserror::Error;

use crate::EventStatus;

/// Errors that can occur in optisync wire and model operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization or deserialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Merge definition rejected before it was sent to the backend
    #[error("invalid merge definition: {0}")]
    InvalidMergeDefinition(String),

    /// Event status change not allowed by the submission protocol
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: EventStatus,
        /// Requested status.
        to: EventStatus,
    },
}
