//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected before any state change
    #[error("Validation failed on {field}: {message}")]
    Validation {
        /// Offending field (wire name)
        field: String,
        /// Human-readable reason
        message: String,
    },

    /// Caller is not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity was never stored
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: &'static str,
        /// Entity id
        id: String,
    },

    /// Entity exists but carries a tombstone
    #[error("{kind} has been deleted: {id}")]
    Deleted {
        /// Entity kind
        kind: &'static str,
        /// Entity id
        id: String,
    },

    /// Optimistic concurrency check failed; caller must refetch
    #[error("Conflict: version mismatch on {kind} {id} (expected {expected}, current {current})")]
    VersionConflict {
        /// Entity kind
        kind: &'static str,
        /// Entity id
        id: String,
        /// Version supplied by the caller
        expected: u64,
        /// Version currently stored
        current: u64,
    },

    /// Uniqueness violation (e.g. identity already linked in the group)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Sync item names an entity kind the reconciler cannot replay
    #[error("Unsupported entity: {0}")]
    UnsupportedEntity(String),

    /// Sync item names an operation the reconciler cannot replay
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invariant violation (money conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a field-level validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for both "never existed" and "soft-deleted"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::Deleted { .. })
    }

    /// True when the caller should refetch and retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
