//! Error types for record log operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing a record log.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame in the middle of the log failed validation.
    #[error("log corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the damaged frame.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// Another process holds the log's lock file.
    #[error("log is locked by another process")]
    Locked,

    /// A record is too large to be framed.
    #[error("record of {len} bytes exceeds the maximum frame size")]
    RecordTooLarge {
        /// Length of the rejected record.
        len: usize,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }
}
