//! # Replica Core
//!
//! Local persistence for the Replica offline synchronization engine.
//!
//! This crate provides:
//! - [`Database`] - keyed tables over a durable record log, with atomic
//!   single-writer transactions and checkpointing
//! - [`LocalStore`] - a per-entity-type table handle with temporary
//!   identifier allocation, large-payload chunking and query tags
//! - [`TransactionLog`] - the ordered queue of writes made while offline
//!
//! ## Key Invariants
//!
//! - A transaction's writes become visible and durable together, or not at all
//! - Temporary identifiers are negative and strictly decreasing per table
//! - Chunked payloads reassemble byte-for-byte in ascending chunk order
//! - Pending operations are returned in insertion order

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod config;
mod database;
mod entity;
mod error;
mod key;
mod meta;
mod oplog;
mod record;
mod store;
mod value;

pub use chunk::{chunk_key, parse_chunk_key, reassemble, split_payload, DEFAULT_CHUNK_SIZE};
pub use config::StoreConfig;
pub use database::{Database, DatabaseStats, ReadSnapshot, TableRead, Transaction, LOG_FILE};
pub use entity::{Entity, Query};
pub use error::{CoreError, CoreResult};
pub use key::EntityKey;
pub use oplog::{OperationKind, PendingOperation, TransactionLog, BLOB_TABLE, QUEUE_TABLE};
pub use store::LocalStore;
pub use value::FieldValue;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
