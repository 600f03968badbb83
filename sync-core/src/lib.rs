//! # sync-core
//!
//! Pure logic for optisync (no I/O, instant tests).
//!
//! This crate implements the optimistic-apply, pending-queue and
//! reconciliation engine without any network, timer or disk I/O, enabling
//! fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (backend submissions, retry timers, realtime delivery) is
//! performed by `sync-client`, which drives these types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connectivity;
pub mod merge;
pub mod queue;
pub mod retry;
pub mod store;

pub use connectivity::{Action, ConnectivityState, Event as ConnectivityEvent};
pub use merge::{fold, MergePolicy};
pub use queue::{EventQueue, QueueEntry};
pub use retry::{
    flush_schedule, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_FLUSH_STAGGER, DEFAULT_MAX_DELAY,
};
pub use store::LocalStore;
