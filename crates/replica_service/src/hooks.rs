//! Per-entity-type extension points.

use crate::error::ServiceResult;
use async_trait::async_trait;
use replica_core::{Entity, EntityKey, PendingOperation};

/// Customisation hooks for one entity type.
///
/// Every method has an identity or no-op default.
#[async_trait]
pub trait EntityHooks: Send + Sync {
    /// Loads reference data the type depends on. Runs once per service,
    /// before its first operation.
    async fn init(&self) -> ServiceResult<()> {
        Ok(())
    }

    /// Adapts an entity read from the local store for the caller.
    fn map_item(&self, entity: Entity) -> Entity {
        entity
    }

    /// Prepares an entity for persistence. The default drops the resolved
    /// link cache.
    fn to_storage_format(&self, mut entity: Entity) -> Entity {
        entity.resolved.clear();
        entity
    }

    /// Rewrites this type's pending operations after an entity of
    /// `synced_type` received its permanent identifier.
    fn update_linked_operations(
        &self,
        _synced_type: &str,
        _old_id: &EntityKey,
        _new_id: &EntityKey,
        operations: Vec<PendingOperation>,
    ) -> Vec<PendingOperation> {
        operations
    }
}

/// Hooks with every default behaviour.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl EntityHooks for DefaultHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_storage_format_strips_links() {
        let mut entity = Entity::new("a");
        entity.resolved.insert("owner".into(), vec![Entity::new("ann")]);

        let stored = DefaultHooks.to_storage_format(entity);
        assert!(stored.resolved.is_empty());
        assert_eq!(stored.title, "a");
    }

    #[tokio::test]
    async fn default_init_succeeds() {
        assert!(DefaultHooks.init().await.is_ok());
    }
}
