//! Remote backend abstraction.

use crate::clock::{Clock, SystemClock};
use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use replica_core::{Entity, EntityKey, Query};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The remote backend holding the authoritative copy of every entity.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, RPC, in-memory mock for testing, etc.). Unreachable
/// backends must fail with [`ServiceError::RemoteUnavailable`]; a write whose
/// version is behind the remote's must fail with
/// [`ServiceError::VersionConflict`].
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Fetches every entity of a type.
    async fn fetch_all(&self, entity_type: &str) -> ServiceResult<Vec<Entity>>;

    /// Fetches the entities matching an ad-hoc query.
    async fn fetch_by_query(&self, entity_type: &str, query: &Query) -> ServiceResult<Vec<Entity>>;

    /// Fetches one entity.
    async fn fetch_by_id(&self, entity_type: &str, id: &EntityKey)
        -> ServiceResult<Option<Entity>>;

    /// Fetches several entities. Missing ones are skipped.
    async fn fetch_by_ids(&self, entity_type: &str, ids: &[EntityKey])
        -> ServiceResult<Vec<Entity>>;

    /// Creates or updates an entity and returns the remote's copy, carrying
    /// its final identifier and version.
    async fn write(&self, entity_type: &str, entity: &Entity) -> ServiceResult<Entity>;

    /// Deletes an entity.
    async fn delete(&self, entity_type: &str, entity: &Entity) -> ServiceResult<()>;

    /// Probes whether the backend can be reached.
    async fn check_reachable(&self) -> bool;

    /// Returns when data of `entity_type` last changed upstream, if the
    /// backend tracks it.
    async fn last_modified(&self, _entity_type: &str) -> ServiceResult<Option<u64>> {
        Ok(None)
    }
}

/// An in-memory remote for tests and demos.
///
/// Identifiers start at 100 and versions at 1. A write carrying a version
/// lower than the stored one is rejected as a conflict. Queries match when
/// every criterion equals the entity field of the same name. Every write
/// stamps the entity type's last-modified time from the remote's clock.
pub struct MockRemote {
    reachable: AtomicBool,
    tables: Mutex<HashMap<String, BTreeMap<EntityKey, Entity>>>,
    next_id: AtomicI64,
    modified: Mutex<HashMap<String, u64>>,
    clock: Arc<dyn Clock>,
    fetches: AtomicUsize,
    writes: Mutex<Vec<(String, String)>>,
    write_failures: Mutex<VecDeque<ServiceError>>,
    fetch_failures: Mutex<VecDeque<ServiceError>>,
    delay: Mutex<Option<Duration>>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Creates an empty, reachable remote.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            tables: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(100),
            modified: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            fetches: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            write_failures: Mutex::new(VecDeque::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
        }
    }

    /// Uses `clock` for last-modified stamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets whether the remote can be reached.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes every fetch, write and delete wait before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Stores entities as-is.
    pub fn seed(&self, entity_type: &str, entities: Vec<Entity>) {
        let mut tables = self.tables.lock();
        let table = tables.entry(entity_type.to_string()).or_default();
        for entity in entities {
            table.insert(entity.id.clone(), entity);
        }
        drop(tables);
        self.touch(entity_type);
    }

    /// Makes the next write fail with `error`.
    pub fn fail_next_write(&self, error: ServiceError) {
        self.write_failures.lock().push_back(error);
    }

    /// Makes the next fetch fail with `error`.
    pub fn fail_next_fetch(&self, error: ServiceError) {
        self.fetch_failures.lock().push_back(error);
    }

    /// Returns the stored entity.
    #[must_use]
    pub fn get(&self, entity_type: &str, id: &EntityKey) -> Option<Entity> {
        self.tables
            .lock()
            .get(entity_type)
            .and_then(|t| t.get(id).cloned())
    }

    /// Returns every stored entity of a type.
    #[must_use]
    pub fn entities(&self, entity_type: &str) -> Vec<Entity> {
        self.tables
            .lock()
            .get(entity_type)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns how many fetches were answered.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Returns the `(entity_type, title)` of every accepted write, in order.
    #[must_use]
    pub fn write_log(&self) -> Vec<(String, String)> {
        self.writes.lock().clone()
    }

    fn touch(&self, entity_type: &str) {
        let now = self.clock.now_millis();
        self.modified.lock().insert(entity_type.to_string(), now);
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn begin_fetch(&self) -> ServiceResult<()> {
        self.pause().await;
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ServiceError::unavailable("mock remote is offline"));
        }
        if let Some(error) = self.fetch_failures.lock().pop_front() {
            return Err(error);
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn begin_write(&self) -> ServiceResult<()> {
        self.pause().await;
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ServiceError::unavailable("mock remote is offline"));
        }
        match self.write_failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteAdapter for MockRemote {
    async fn fetch_all(&self, entity_type: &str) -> ServiceResult<Vec<Entity>> {
        self.begin_fetch().await?;
        Ok(self.entities(entity_type))
    }

    async fn fetch_by_query(&self, entity_type: &str, query: &Query) -> ServiceResult<Vec<Entity>> {
        self.begin_fetch().await?;
        Ok(self
            .entities(entity_type)
            .into_iter()
            .filter(|e| {
                query
                    .criteria()
                    .iter()
                    .all(|(name, value)| e.field(name) == Some(value))
            })
            .collect())
    }

    async fn fetch_by_id(
        &self,
        entity_type: &str,
        id: &EntityKey,
    ) -> ServiceResult<Option<Entity>> {
        self.begin_fetch().await?;
        Ok(self.get(entity_type, id))
    }

    async fn fetch_by_ids(
        &self,
        entity_type: &str,
        ids: &[EntityKey],
    ) -> ServiceResult<Vec<Entity>> {
        self.begin_fetch().await?;
        Ok(ids
            .iter()
            .filter_map(|id| self.get(entity_type, id))
            .collect())
    }

    async fn write(&self, entity_type: &str, entity: &Entity) -> ServiceResult<Entity> {
        self.begin_write().await?;

        let saved = {
            let mut tables = self.tables.lock();
            let table = tables.entry(entity_type.to_string()).or_default();

            let mut saved = entity.clone();
            saved.resolved.clear();
            if entity.id.is_temporary() {
                saved.id = EntityKey::Int(self.next_id.fetch_add(1, Ordering::SeqCst));
                saved.version = Some(1);
            } else if let Some(current) = table.get(&entity.id) {
                let current_version = current.version.unwrap_or(0);
                if entity.version.unwrap_or(0) < current_version {
                    return Err(ServiceError::conflict(entity_type, entity.id.clone()));
                }
                saved.version = Some(current_version + 1);
            } else {
                saved.version = Some(1);
            }

            table.insert(saved.id.clone(), saved.clone());
            saved
        };

        self.writes
            .lock()
            .push((entity_type.to_string(), saved.title.clone()));
        self.touch(entity_type);
        Ok(saved)
    }

    async fn delete(&self, entity_type: &str, entity: &Entity) -> ServiceResult<()> {
        self.begin_write().await?;
        if let Some(table) = self.tables.lock().get_mut(entity_type) {
            table.remove(&entity.id);
        }
        self.touch(entity_type);
        Ok(())
    }

    async fn check_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn last_modified(&self, entity_type: &str) -> ServiceResult<Option<u64>> {
        Ok(self.modified.lock().get(entity_type).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn write_assigns_ids_and_versions() {
        let remote = MockRemote::new();

        let created = remote
            .write("task", &Entity::new("a").with_id(-2))
            .await
            .unwrap();
        assert_eq!(created.id, EntityKey::Int(100));
        assert_eq!(created.version, Some(1));

        let updated = remote.write("task", &created).await.unwrap();
        assert_eq!(updated.version, Some(2));
        assert_eq!(remote.write_log().len(), 2);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let remote = MockRemote::new();
        remote.seed("task", vec![Entity::new("a").with_id(5).with_version(3)]);

        let result = remote
            .write("task", &Entity::new("a'").with_id(5).with_version(2))
            .await;
        assert!(matches!(result, Err(ServiceError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn offline_remote_is_unavailable() {
        let remote = MockRemote::new();
        remote.set_reachable(false);

        assert!(!remote.check_reachable().await);
        assert!(remote.fetch_all("task").await.unwrap_err().is_unavailable());
        assert!(remote
            .write("task", &Entity::new("a"))
            .await
            .unwrap_err()
            .is_unavailable());
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_once() {
        let remote = MockRemote::new();
        remote.fail_next_write(ServiceError::remote("rejected"));

        assert!(remote.write("task", &Entity::new("a")).await.is_err());
        assert!(remote.write("task", &Entity::new("a")).await.is_ok());
    }

    #[tokio::test]
    async fn query_matches_fields() {
        let remote = MockRemote::new();
        remote.seed(
            "task",
            vec![
                Entity::new("a").with_id(1).with_field("owner", "ann"),
                Entity::new("b").with_id(2).with_field("owner", "bob"),
            ],
        );

        let found = remote
            .fetch_by_query("task", &Query::new().filter("owner", "bob"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "b");
    }

    #[tokio::test]
    async fn last_modified_moves_on_write() {
        let clock = Arc::new(ManualClock::new(1_000));
        let remote = MockRemote::new().with_clock(clock.clone());
        assert_eq!(remote.last_modified("task").await.unwrap(), None);

        remote.write("task", &Entity::new("a")).await.unwrap();
        assert_eq!(remote.last_modified("task").await.unwrap(), Some(1_000));

        clock.advance(Duration::from_millis(500));
        remote.write("task", &Entity::new("b")).await.unwrap();
        assert_eq!(remote.last_modified("task").await.unwrap(), Some(1_500));
    }
}
