//! Error types for the offline queue

use thiserror::Error;

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Queue errors
#[derive(Error, Debug)]
pub enum Error {
    /// Pending and failed items already fill the queue
    #[error("Sync queue is full ({capacity} items waiting)")]
    QueueFull {
        /// Configured ceiling
        capacity: usize,
    },

    /// No item with this local id
    #[error("Queue item not found: {0}")]
    NotFound(u64),

    /// Item is not in a state that allows the transition
    #[error("Queue item {local_id} is {status}, expected {expected}")]
    InvalidState {
        /// Local id
        local_id: u64,
        /// Current status
        status: &'static str,
        /// Status the transition requires
        expected: &'static str,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Round trip to the server failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server rejected the batch as a whole
    #[error("Server rejected batch: {0}")]
    Remote(#[from] split_ledger::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("Error: {0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
