//! In-memory record log for testing.

use crate::error::StorageResult;
use crate::frame::{encode_frame, scan_frames};
use crate::log::{LogRecord, RecordLog};
use parking_lot::RwLock;

/// An in-memory record log.
///
/// Records are framed exactly as [`super::FileLog`] frames them, so the
/// same torn-tail and corruption rules apply. Suitable for:
/// - Unit and integration tests
/// - Ephemeral replicas that do not need to survive a restart
///
/// # Example
///
/// ```rust
/// use replica_storage::{MemoryLog, RecordLog};
///
/// let mut log = MemoryLog::new();
/// let offset = log.append(b"record").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(log.records().unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryLog {
    data: RwLock<Vec<u8>>,
}

impl MemoryLog {
    /// Creates a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log over pre-existing raw bytes.
    ///
    /// A torn tail in `data` is discarded, as it would be when reopening a
    /// file. Useful for recovery tests.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is corrupted before its final frame.
    pub fn from_bytes(mut data: Vec<u8>) -> StorageResult<Self> {
        let scan = scan_frames(&data)?;
        data.truncate(scan.valid_len as usize);
        Ok(Self {
            data: RwLock::new(data),
        })
    }

    /// Returns a copy of the raw framed bytes.
    #[must_use]
    pub fn raw_bytes(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl RecordLog for MemoryLog {
    fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        let frame = encode_frame(payload)?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(&frame);
        Ok(offset)
    }

    fn records(&self) -> StorageResult<Vec<LogRecord>> {
        Ok(scan_frames(&self.data.read())?.records)
    }

    fn rewrite(&mut self, payloads: &[Vec<u8>]) -> StorageResult<()> {
        let mut fresh = Vec::new();
        for payload in payloads {
            fresh.extend_from_slice(&encode_frame(payload)?);
        }
        *self.data.write() = fresh;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        // Nothing to make durable
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        self.data.write().truncate(len as usize);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}
