//! Record log trait definition.

use crate::error::StorageResult;

/// A record read back from a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Byte offset of the record's frame within the log.
    pub offset: u64,
    /// The record payload as it was appended.
    pub payload: Vec<u8>,
}

/// An append-only log of opaque records.
///
/// # Invariants
///
/// - `append` returns the offset where the record's frame starts
/// - `records` returns every appended record, in append order
/// - a torn final record (crash mid-append) is never returned
/// - `rewrite` atomically replaces the whole log; readers observe either the
///   old or the new contents, never a mix
/// - implementations must be `Send + Sync` so a log can sit behind a lock in
///   a shared database handle
///
/// # Implementors
///
/// - [`super::MemoryLog`] - For testing
/// - [`super::FileLog`] - For persistent storage
pub trait RecordLog: Send + Sync {
    /// Appends a record to the end of the log.
    ///
    /// Returns the offset of the new record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be framed or written.
    fn append(&mut self, payload: &[u8]) -> StorageResult<u64>;

    /// Reads every complete record in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Corrupted`] if a record other than the
    /// last one fails validation.
    fn records(&self) -> StorageResult<Vec<LogRecord>>;

    /// Replaces the entire log with `payloads`.
    ///
    /// Used for checkpointing: the caller writes a snapshot record that
    /// supersedes everything appended before.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement cannot be written. On error the
    /// previous contents remain intact.
    fn rewrite(&mut self, payloads: &[Vec<u8>]) -> StorageResult<()>;

    /// Makes every appended record durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the log back to `len` bytes, dropping every record that starts
    /// at or after that offset.
    ///
    /// `len` must be an offset previously returned by
    /// [`RecordLog::append`] or the current size.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be shortened.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;

    /// Returns the current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}
