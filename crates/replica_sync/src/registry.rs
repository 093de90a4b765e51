//! Entity type tags mapped to their data services.

use crate::error::{SyncError, SyncResult};
use replica_service::DataService;
use std::collections::BTreeMap;

/// The data services the sync engine can replay operations through.
///
/// Tags are `&'static str` constants known at build time. Queued operations
/// whose entity type has no registered service are rejected with
/// [`SyncError::UnknownEntityType`].
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<&'static str, DataService>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `tag`.
    ///
    /// # Errors
    ///
    /// Fails if `tag` differs from the service's entity type or is already
    /// taken.
    pub fn register(&mut self, tag: &'static str, service: DataService) -> SyncResult<()> {
        if service.entity_type() != tag || self.services.contains_key(tag) {
            return Err(SyncError::Registration {
                tag: tag.to_string(),
                entity_type: service.entity_type().to_string(),
            });
        }
        self.services.insert(tag, service);
        Ok(())
    }

    /// Builder form of [`ServiceRegistry::register`].
    ///
    /// # Errors
    ///
    /// See [`ServiceRegistry::register`].
    pub fn with(mut self, tag: &'static str, service: DataService) -> SyncResult<Self> {
        self.register(tag, service)?;
        Ok(self)
    }

    /// Returns the service for an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownEntityType`] if none is registered.
    pub fn get(&self, entity_type: &str) -> SyncResult<&DataService> {
        self.services
            .get(entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))
    }

    /// Iterates over the registered services in tag order.
    pub fn services(&self) -> impl Iterator<Item = &DataService> {
        self.services.values()
    }

    /// Returns the registered tags in order.
    #[must_use]
    pub fn tags(&self) -> Vec<&'static str> {
        self.services.keys().copied().collect()
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
