//! REST backend abstraction for optisync.
//!
//! The backend holds the authoritative state for one application namespace.
//! The engine uses three calls:
//!
//! | Call              | HTTP                 | Body                        |
//! |-------------------|----------------------|-----------------------------|
//! | `fetch_state`     | `GET {url}/state`    | -                           |
//! | `register_merge`  | `POST {url}/merge_func` | `{"function": "..."}`    |
//! | `submit_event`    | `POST {url}/event`   | serialized event            |
//!
//! Every request carries the `Application-Name` header. Any non-2xx status
//! or network error is a failure.

mod http;
mod mock;

pub use http::{HttpBackend, APPLICATION_NAME_HEADER};
pub use mock::{MockBackend, ServerMerge, SubmittedEvent};

use async_trait::async_trait;
use optisync_types::MergeDefinition;
use serde_json::Value;
use thiserror::Error;

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Request never produced a response (connect failure, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-2xx status.
    #[error("rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether the failure may go away on its own.
    ///
    /// The engine retries every failed submission regardless; this is for
    /// callers that issue one-shot requests.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Network(_) => true,
            BackendError::Rejected { status, .. } => *status >= 500 || *status == 429,
            BackendError::Decode(_) => false,
        }
    }
}

/// Authoritative state service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the current authoritative state.
    async fn fetch_state(&self) -> Result<Value, BackendError>;

    /// Register the serialized merge policy for server-side replay.
    async fn register_merge(&self, definition: &MergeDefinition) -> Result<(), BackendError>;

    /// Submit one event. `Ok` means the backend acknowledged it.
    async fn submit_event(&self, event: &Value) -> Result<(), BackendError>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for std::sync::Arc<T> {
    async fn fetch_state(&self) -> Result<Value, BackendError> {
        (**self).fetch_state().await
    }

    async fn register_merge(&self, definition: &MergeDefinition) -> Result<(), BackendError> {
        (**self).register_merge(definition).await
    }

    async fn submit_event(&self, event: &Value) -> Result<(), BackendError> {
        (**self).submit_event(event).await
    }
}
