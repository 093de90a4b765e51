//! Error types for data services.

use replica_core::{CoreError, EntityKey};
use std::sync::Arc;
use thiserror::Error;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that can occur in data service operations.
///
/// `ServiceError` is `Clone` so one in-flight result can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    /// The remote backend could not be reached.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The submitted version is behind the remote's.
    #[error("version conflict for {entity_type} {id}")]
    VersionConflict {
        /// Entity type of the rejected write.
        entity_type: String,
        /// Identifier of the rejected entity.
        id: EntityKey,
    },

    /// The remote rejected the request for any other reason.
    #[error("remote error: {0}")]
    Remote(String),

    /// The local store failed. Fatal to the enclosing call.
    #[error("local storage error: {0}")]
    LocalStorage(Arc<CoreError>),

    /// A lazy initialisation hook failed.
    #[error("initialisation failed: {0}")]
    Init(String),
}

impl ServiceError {
    /// Creates a remote-unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable(message.into())
    }

    /// Creates a generic remote error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Creates a version conflict error.
    pub fn conflict(entity_type: impl Into<String>, id: EntityKey) -> Self {
        Self::VersionConflict {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// Returns true if the remote could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ServiceError::RemoteUnavailable(_))
    }

    /// Returns true for version conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::VersionConflict { .. })
    }

    /// Returns true if a later replay of the same write may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::RemoteUnavailable(_) | ServiceError::Remote(_) | ServiceError::Init(_)
        )
    }
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        Self::LocalStorage(Arc::new(err))
    }
}
