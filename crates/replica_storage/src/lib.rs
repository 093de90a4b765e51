//! # Replica Storage
//!
//! Durable record log backends for the Replica offline store.
//!
//! A backend is an **append-only sequence of opaque records**. Each record
//! is framed with a magic marker, a length and a CRC-32 so that a torn write
//! at the end of the log is detected and discarded on the next open, while
//! damage anywhere else is reported as corruption.
//!
//! Backends do not interpret the records they hold; `replica_core` owns the
//! record format (commits and snapshots of its tables).
//!
//! ## Available Backends
//!
//! - [`MemoryLog`] - For tests and ephemeral replicas
//! - [`FileLog`] - For persistent replicas, guarded by an exclusive lock file
//!
//! ## Example
//!
//! ```rust
//! use replica_storage::{MemoryLog, RecordLog};
//!
//! let mut log = MemoryLog::new();
//! log.append(b"first").unwrap();
//! log.append(b"second").unwrap();
//!
//! let records = log.records().unwrap();
//! assert_eq!(records.len(), 2);
//! assert_eq!(records[1].payload, b"second");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod frame;
mod log;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileLog;
pub use frame::{compute_crc32, encode_frame, scan_frames, FrameScan, FRAME_MAGIC, FRAME_OVERHEAD};
pub use log::{LogRecord, RecordLog};
pub use memory::MemoryLog;
