//! Error types for the local store.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in local store operations.
///
/// Every variant is fatal to the enclosing call: the transaction it occurred
/// in has been aborted and nothing it wrote is visible.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Record log error.
    #[error("storage error: {0}")]
    Storage(#[from] replica_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// A key cannot be used for an entity.
    #[error("invalid key {key}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A transaction was aborted by its body.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for the abort.
        reason: String,
    },

    /// The database directory does not exist.
    #[error("database not found at {path}")]
    DatabaseNotFound {
        /// Path that was looked up.
        path: String,
    },

    /// The record log holds an entry this version cannot interpret.
    #[error("corrupted log entry: {message}")]
    Corrupted {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a transaction-aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
