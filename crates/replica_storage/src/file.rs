//! File-based record log for persistent replicas.

use crate::error::{StorageError, StorageResult};
use crate::frame::{encode_frame, scan_frames};
use crate::log::{LogRecord, RecordLog};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file-based record log.
///
/// # Locking
///
/// Opening a log acquires an exclusive advisory lock on a sibling
/// `<file>.lock`. A second open of the same path, from this or another
/// process, fails with [`StorageError::Locked`] until the first handle is
/// dropped.
///
/// # Recovery
///
/// On open, a torn final record is truncated away so later appends start on
/// a frame boundary.
///
/// # Durability
///
/// - `append()` writes the frame and flushes it to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
/// - `rewrite()` writes a temporary file, syncs it and renames it over the log
///
/// # Example
///
/// ```no_run
/// use replica_storage::{FileLog, RecordLog};
/// use std::path::Path;
///
/// let mut log = FileLog::open(Path::new("replica.log")).unwrap();
/// log.append(b"commit").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    _lock: File,
}

impl FileLog {
    /// Opens or creates a log at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, the lock is held
    /// elsewhere, or the existing contents are corrupted.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;
        lock.try_lock_exclusive()
            .map_err(|_| StorageError::Locked)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let scan = scan_frames(&data)?;

        if scan.torn_tail {
            warn!(
                path = %path.display(),
                discarded = data.len() as u64 - scan.valid_len,
                "truncating torn record at end of log"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), records = scan.records.len(), "opened record log");

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(scan.valid_len),
            _lock: lock,
        })
    }

    /// Opens or creates a log, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the log cannot be
    /// opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl RecordLog for FileLog {
    fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        let frame = encode_frame(payload)?;

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&frame)?;
        file.flush()?;
        *size += frame.len() as u64;

        Ok(offset)
    }

    fn records(&self) -> StorageResult<Vec<LogRecord>> {
        let size = *self.size.read();
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;

        let mut data = vec![0u8; size as usize];
        file.read_exact(&mut data)?;

        Ok(scan_frames(&data)?.records)
    }

    fn rewrite(&mut self, payloads: &[Vec<u8>]) -> StorageResult<()> {
        let tmp = temp_path(&self.path);
        let mut written = 0u64;
        {
            let mut out = File::create(&tmp)?;
            for payload in payloads {
                let frame = encode_frame(payload)?;
                out.write_all(&frame)?;
                written += frame.len() as u64;
            }
            out.sync_all()?;
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        fs::rename(&tmp, &self.path)?;
        *file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        *size = written;

        debug!(path = %self.path.display(), records = payloads.len(), "rewrote record log");
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();
        if len >= *size {
            return Ok(());
        }

        file.set_len(len)?;
        file.sync_all()?;
        *size = len;

        debug!(path = %self.path.display(), len, "truncated record log");
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_OVERHEAD;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(log.path(), path);
    }

    #[test]
    fn file_append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        let mut log = FileLog::open(&path).unwrap();
        assert_eq!(log.append(b"alpha").unwrap(), 0);
        assert_eq!(log.append(b"beta").unwrap(), (5 + FRAME_OVERHEAD) as u64);

        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"alpha");
        assert_eq!(records[1].payload, b"beta");
    }

    #[test]
    fn file_truncate_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        {
            let mut log = FileLog::open(&path).unwrap();
            log.append(b"keep").unwrap();
            let offset = log.append(b"drop").unwrap();
            log.truncate(offset).unwrap();
            assert_eq!(log.size().unwrap(), offset);

            // Appends continue from the new end
            log.append(b"next").unwrap();
        }

        let log = FileLog::open(&path).unwrap();
        let payloads: Vec<Vec<u8>> = log.records().unwrap().into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![b"keep".to_vec(), b"next".to_vec()]);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        {
            let mut log = FileLog::open(&path).unwrap();
            log.append(b"persistent record").unwrap();
            log.sync().unwrap();
        }

        let log = FileLog::open(&path).unwrap();
        let records = log.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"persistent record");
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        let _first = FileLog::open(&path).unwrap();
        let second = FileLog::open(&path);
        assert!(matches!(second, Err(StorageError::Locked)));
    }

    #[test]
    fn file_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        drop(FileLog::open(&path).unwrap());
        assert!(FileLog::open(&path).is_ok());
    }

    #[test]
    fn file_torn_tail_truncated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        {
            let mut log = FileLog::open(&path).unwrap();
            log.append(b"complete").unwrap();
            log.append(b"torn").unwrap();
            log.sync().unwrap();
        }

        // Chop the last frame in half
        let full = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(full - 5)
            .unwrap();

        let mut log = FileLog::open(&path).unwrap();
        assert_eq!(log.records().unwrap().len(), 1);
        assert_eq!(log.size().unwrap(), (8 + FRAME_OVERHEAD) as u64);

        log.append(b"after").unwrap();
        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload, b"after");
    }

    #[test]
    fn file_rewrite_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.log");

        {
            let mut log = FileLog::open(&path).unwrap();
            for i in 0..10u8 {
                log.append(&[i; 32]).unwrap();
            }
            log.rewrite(&[b"snapshot".to_vec()]).unwrap();
            assert_eq!(log.size().unwrap(), (8 + FRAME_OVERHEAD) as u64);

            log.append(b"tail").unwrap();
        }

        let log = FileLog::open(&path).unwrap();
        let payloads: Vec<Vec<u8>> = log.records().unwrap().into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![b"snapshot".to_vec(), b"tail".to_vec()]);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("replica.log");

        let log = FileLog::open_with_create_dirs(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert!(path.exists());
    }
}
