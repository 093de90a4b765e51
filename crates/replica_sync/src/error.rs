//! Error types for the sync engine.

use replica_core::CoreError;
use replica_service::ServiceError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Remote failures of individual operations are not errors of the run; they
/// are reported as formatted messages by [`SyncEngine::run`](crate::SyncEngine::run).
#[derive(Error, Debug)]
pub enum SyncError {
    /// A run was started while another was active.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// No data service is registered for a queued entity type.
    #[error("no data service registered for entity type {0}")]
    UnknownEntityType(String),

    /// A service was registered under a tag that is not its entity type, or
    /// twice under the same tag.
    #[error("cannot register service for {entity_type} under tag {tag}")]
    Registration {
        /// Tag used for registration.
        tag: String,
        /// Entity type of the service.
        entity_type: String,
    },

    /// Local storage error.
    #[error("local storage error: {0}")]
    Core(#[from] CoreError),

    /// Local failure inside a data service.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}
