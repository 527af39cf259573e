//! SplitFree Sync Queue
//!
//! Client side of offline sync: writes made without connectivity are kept in
//! a durable, bounded, ordered queue and replayed against the ledger's
//! reconciler when a sync pass runs.
//!
//! # Architecture
//!
//! - **OfflineQueue**: RocksDB log of write intents, keyed by a monotonic
//!   local id
//! - **SyncTransport**: one round trip per batch, outcomes keyed by `tempId`
//! - **SyncCoordinator**: single in-flight pass, state published via `watch`
//!
//! # Item lifecycle
//!
//! `pending -> syncing -> removed | failed -> ... -> dead_letter`
//!
//! Failed items are retried on later passes until the retry ceiling, after
//! which they stay dead-lettered until requeued or cleared.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod transport;
pub mod types;

// Re-exports
pub use config::QueueConfig;
pub use coordinator::{PassOutcome, SyncCoordinator, SyncReport, SyncState};
pub use error::{Error, Result};
pub use queue::OfflineQueue;
pub use transport::{LocalTransport, SyncTransport};
pub use types::{Enqueued, NewQueueItem, QueueStatus, SyncQueueItem};
