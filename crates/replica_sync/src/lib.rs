//! # Replica Sync
//!
//! Replays writes queued while offline against the remote backend.
//!
//! This crate provides:
//! - [`SyncEngine`] - sequential replay of the pending-operation queue
//! - [`ServiceRegistry`] - entity type tags mapped to their data services
//! - Temporary identifier remapping across later queued operations
//! - Failure classification: conflicts are abandoned, other failures retried
//!
//! ## Key Invariants
//!
//! - Operations replay in queue order, one at a time
//! - After a successful create, no later queued operation holds its
//!   temporary identifier
//! - After a run, the queue holds exactly the operations to retry
//! - Only one run is active at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod registry;

pub use config::SyncConfig;
pub use engine::{failure_message, SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use registry::ServiceRegistry;
