//! # Replica Service
//!
//! Per-entity-type data services for the Replica offline synchronization
//! engine.
//!
//! A [`DataService`] answers reads from a [`RemoteAdapter`] when the local
//! copy is stale and from the local store otherwise, coalesces identical
//! concurrent reads, and turns writes made while the remote is unreachable
//! into pending operations for the sync engine to replay.
//!
//! ## Example
//!
//! ```rust,no_run
//! use replica_core::{Database, Entity};
//! use replica_service::{CachePolicy, DataService, MockRemote, ServiceConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> replica_service::ServiceResult<()> {
//! let db = Arc::new(Database::open_in_memory()?);
//! let remote = Arc::new(MockRemote::new());
//! let tasks = DataService::new("task", db, remote)
//!     .with_config(ServiceConfig::new().with_cache_policy(CachePolicy::Always));
//!
//! tasks.add_or_update(Entity::new("buy milk")).await?;
//! for task in tasks.get_all().await? {
//!     println!("{} {}", task.id, task.title);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod freshness;
mod hooks;
mod inflight;
mod remote;
mod schema;
mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use freshness::{needs_refresh, CachePolicy, FreshnessStore, SessionFreshness};
pub use hooks::{DefaultHooks, EntityHooks};
pub use inflight::InFlightRegistry;
pub use remote::{MockRemote, RemoteAdapter};
pub use schema::{EntitySchema, FieldKind, FieldSpec, SchemaHooks};
pub use service::{DataService, WriteOutcome};
