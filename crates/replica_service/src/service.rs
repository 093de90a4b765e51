//! The per-entity-type data service.

use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::freshness::{needs_refresh, FreshnessStore, SessionFreshness};
use crate::hooks::{DefaultHooks, EntityHooks};
use crate::inflight::InFlightRegistry;
use crate::remote::RemoteAdapter;
use futures::future::FutureExt;
use replica_core::{
    CoreResult, Database, Entity, EntityKey, LocalStore, OperationKind, Query, TransactionLog,
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Result of a write.
///
/// Remote rejections are reported in `error` rather than as `Err`, so the
/// caller always gets the entity it should display: the stored copy on
/// success, the authoritative remote copy on a version conflict, or the
/// submitted entity on any other failure.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// The entity after the write.
    pub entity: Entity,
    /// Why the remote rejected the write, if it did.
    pub error: Option<ServiceError>,
}

impl WriteOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn success(entity: Entity) -> Self {
        Self {
            entity,
            error: None,
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failure(entity: Entity, error: ServiceError) -> Self {
        Self {
            entity,
            error: Some(error),
        }
    }

    /// Returns true if the write was accepted.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

enum RemoteWrite {
    Done(WriteOutcome),
    Unavailable(ServiceError),
}

/// Reads and writes for one entity type.
///
/// Reads are served from the remote when the cache policy says the local
/// copy is stale and the remote is reachable, and from the [`LocalStore`]
/// otherwise. Identical concurrent reads share one execution through the
/// [`InFlightRegistry`].
///
/// Writes go to the remote when connected. When the remote cannot be
/// reached, the write is applied locally and queued in the
/// [`TransactionLog`] in the same transaction, to be replayed later by the
/// sync engine.
///
/// # Example
///
/// ```rust,no_run
/// use replica_core::{Database, Entity};
/// use replica_service::{DataService, MockRemote};
/// use std::sync::Arc;
///
/// # async fn demo() -> replica_service::ServiceResult<()> {
/// let db = Arc::new(Database::open_in_memory()?);
/// let service = DataService::new("task", db, Arc::new(MockRemote::new()));
///
/// let outcome = service.add_or_update(Entity::new("write docs")).await?;
/// assert!(outcome.is_ok());
/// let tasks = service.get_all().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DataService {
    entity_type: String,
    store: LocalStore,
    log: TransactionLog,
    remote: Arc<dyn RemoteAdapter>,
    hooks: Arc<dyn EntityHooks>,
    registry: Arc<InFlightRegistry>,
    freshness: Arc<dyn FreshnessStore>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    initialized: Arc<OnceCell<()>>,
}

impl DataService {
    /// Creates a service storing `entity_type` in a table of the same name.
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        db: Arc<Database>,
        remote: Arc<dyn RemoteAdapter>,
    ) -> Self {
        let entity_type = entity_type.into();
        Self {
            store: LocalStore::new(Arc::clone(&db), entity_type.clone()),
            log: TransactionLog::new(db),
            entity_type,
            remote,
            hooks: Arc::new(DefaultHooks),
            registry: Arc::new(InFlightRegistry::new()),
            freshness: Arc::new(SessionFreshness::new()),
            clock: Arc::new(SystemClock),
            config: ServiceConfig::default(),
            initialized: Arc::new(OnceCell::new()),
        }
    }

    /// Uses a custom table handle. It must live in the same database.
    #[must_use]
    pub fn with_store(mut self, store: LocalStore) -> Self {
        self.store = store;
        self
    }

    /// Sets the extension hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Shares an in-flight registry with other services.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<InFlightRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Shares a freshness store with other services.
    #[must_use]
    pub fn with_freshness(mut self, freshness: Arc<dyn FreshnessStore>) -> Self {
        self.freshness = freshness;
        self
    }

    /// Sets the clock used for freshness decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the display label, falling back to the entity type.
    #[must_use]
    pub fn label(&self) -> &str {
        self.config.label.as_deref().unwrap_or(&self.entity_type)
    }

    /// Returns the local table handle.
    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Returns the pending-operation queue.
    #[must_use]
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Returns the extension hooks.
    #[must_use]
    pub fn hooks(&self) -> &Arc<dyn EntityHooks> {
        &self.hooks
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn db(&self) -> &Arc<Database> {
        self.store.database()
    }

    /// Runs the `init` hook if it has not run yet.
    ///
    /// # Errors
    ///
    /// Returns the hook's error; the next call tries again.
    pub async fn init(&self) -> ServiceResult<()> {
        self.initialized
            .get_or_try_init(|| async {
                debug!(entity_type = %self.entity_type, "initialising service");
                self.hooks.init().await
            })
            .await?;
        Ok(())
    }

    // Reads

    /// Returns every entity of the type.
    ///
    /// # Errors
    ///
    /// Returns remote errors other than unavailability, and local storage
    /// errors.
    pub async fn get_all(&self) -> ServiceResult<Vec<Entity>> {
        self.init().await?;
        let this = self.clone();
        self.registry
            .run(&self.entity_type, "all", move || {
                async move { this.load_all().await }.boxed()
            })
            .await
    }

    /// Returns the entities matching an ad-hoc query.
    ///
    /// Offline, the records previously returned for the same query are
    /// served from the local store.
    ///
    /// # Errors
    ///
    /// See [`DataService::get_all`].
    pub async fn get(&self, query: &Query) -> ServiceResult<Vec<Entity>> {
        self.init().await?;
        let tag = query.tag();
        let this = self.clone();
        let query = query.clone();
        let request_tag = tag.clone();
        self.registry
            .run(&self.entity_type, &tag, move || {
                async move { this.load_query(&query, &request_tag).await }.boxed()
            })
            .await
    }

    /// Returns one entity.
    ///
    /// # Errors
    ///
    /// See [`DataService::get_all`].
    pub async fn get_by_id(&self, id: &EntityKey) -> ServiceResult<Option<Entity>> {
        self.init().await?;
        let request_key = format!("id:{id}");
        let this = self.clone();
        let id = id.clone();
        let found = self
            .registry
            .run(&self.entity_type, &request_key, move || {
                async move { this.load_by_id(&id).await }.boxed()
            })
            .await?;
        Ok(found.into_iter().next())
    }

    /// Returns several entities. Unknown identifiers are skipped.
    ///
    /// # Errors
    ///
    /// See [`DataService::get_all`].
    pub async fn get_by_ids(&self, ids: &[EntityKey]) -> ServiceResult<Vec<Entity>> {
        self.init().await?;
        let joined: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let request_key = format!("ids:{}", joined.join(","));
        let this = self.clone();
        let ids = ids.to_vec();
        self.registry
            .run(&self.entity_type, &request_key, move || {
                async move { this.load_by_ids(&ids).await }.boxed()
            })
            .await
    }

    fn freshness_key(&self, request_key: &str) -> String {
        if request_key == "all" {
            self.entity_type.clone()
        } else {
            format!("{}/{request_key}", self.entity_type)
        }
    }

    async fn should_refresh(&self, key: &str) -> bool {
        let last = self.freshness.get(key);
        let now = self.clock.now_millis();
        if !needs_refresh(self.config.cache_policy, last, now) {
            return false;
        }

        if self.config.check_connectivity && !self.remote.check_reachable().await {
            debug!(entity_type = %self.entity_type, "remote unreachable, reading local data");
            return false;
        }

        if self.config.use_last_modified {
            if let Some(last) = last {
                match self.remote.last_modified(&self.entity_type).await {
                    Ok(Some(modified)) if modified <= last => {
                        debug!(entity_type = %self.entity_type, "unchanged upstream, skipping refresh");
                        return false;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "last-modified probe failed"),
                }
            }
        }

        true
    }

    fn fall_back(&self, error: &ServiceError) {
        warn!(
            entity_type = %self.entity_type,
            error = %error,
            "remote fetch failed, serving local data"
        );
    }

    fn map_local(&self, entities: Vec<Entity>) -> Vec<Entity> {
        entities
            .into_iter()
            .map(|e| self.hooks.map_item(e))
            .collect()
    }

    fn mark_fresh(&self, key: &str, count: usize) {
        self.freshness.set(key, self.clock.now_millis());
        info!(entity_type = %self.entity_type, key, count, "refreshed from remote");
    }

    async fn load_all(&self) -> ServiceResult<Vec<Entity>> {
        let key = self.freshness_key("all");
        if self.should_refresh(&key).await {
            match self.remote.fetch_all(&self.entity_type).await {
                Ok(remote) => {
                    let stored = self.store_all(remote)?;
                    self.mark_fresh(&key, stored.len());
                    return Ok(stored);
                }
                Err(e) if e.is_unavailable() => self.fall_back(&e),
                Err(e) => return Err(e),
            }
        }
        Ok(self.map_local(self.store.get_all()?))
    }

    /// Replaces the table with `remote`, keeping records that only exist
    /// locally (temporary ids).
    fn store_all(&self, remote: Vec<Entity>) -> ServiceResult<Vec<Entity>> {
        let converted: Vec<Entity> = remote
            .into_iter()
            .map(|e| self.hooks.to_storage_format(e))
            .collect();

        let stored = self.db().transaction(|txn| {
            let unsynced: Vec<Entity> = self
                .store
                .get_all_from(&*txn)?
                .into_iter()
                .filter(|e| e.id.is_temporary())
                .collect();
            let stored = self.store.replace_all_in_txn(txn, converted)?;
            for entity in unsynced {
                self.store.put_in_txn(txn, entity, None)?;
            }
            Ok(stored)
        })?;
        Ok(stored)
    }

    fn store_each(&self, remote: Vec<Entity>, tag: Option<&str>) -> ServiceResult<Vec<Entity>> {
        let stored = self.db().transaction(|txn| {
            remote
                .into_iter()
                .map(|e| {
                    self.store
                        .put_in_txn(txn, self.hooks.to_storage_format(e), tag)
                })
                .collect::<CoreResult<Vec<_>>>()
        })?;
        Ok(stored)
    }

    async fn load_query(&self, query: &Query, tag: &str) -> ServiceResult<Vec<Entity>> {
        let key = self.freshness_key(tag);
        if self.should_refresh(&key).await {
            match self.remote.fetch_by_query(&self.entity_type, query).await {
                Ok(remote) => {
                    let stored = self.store_each(remote, Some(tag))?;
                    self.mark_fresh(&key, stored.len());
                    return Ok(stored);
                }
                Err(e) if e.is_unavailable() => self.fall_back(&e),
                Err(e) => return Err(e),
            }
        }
        Ok(self.map_local(self.store.get_by_tag(tag)?))
    }

    async fn load_by_id(&self, id: &EntityKey) -> ServiceResult<Vec<Entity>> {
        let key = self.freshness_key(&format!("id:{id}"));
        if self.should_refresh(&key).await {
            match self.remote.fetch_by_id(&self.entity_type, id).await {
                Ok(remote) => {
                    let stored = self.store_each(remote.into_iter().collect(), None)?;
                    self.mark_fresh(&key, stored.len());
                    return Ok(stored);
                }
                Err(e) if e.is_unavailable() => self.fall_back(&e),
                Err(e) => return Err(e),
            }
        }
        Ok(self.map_local(self.store.get(id)?.into_iter().collect()))
    }

    async fn load_by_ids(&self, ids: &[EntityKey]) -> ServiceResult<Vec<Entity>> {
        let joined: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let key = self.freshness_key(&format!("ids:{}", joined.join(",")));
        if self.should_refresh(&key).await {
            match self.remote.fetch_by_ids(&self.entity_type, ids).await {
                Ok(remote) => {
                    let stored = self.store_each(remote, None)?;
                    self.mark_fresh(&key, stored.len());
                    return Ok(stored);
                }
                Err(e) if e.is_unavailable() => self.fall_back(&e),
                Err(e) => return Err(e),
            }
        }

        let local = ids
            .iter()
            .map(|id| self.store.get(id))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(self.map_local(local.into_iter().flatten().collect()))
    }

    // Writes

    async fn is_connected(&self) -> bool {
        !self.config.check_connectivity || self.remote.check_reachable().await
    }

    /// Creates or updates an entity.
    ///
    /// # Errors
    ///
    /// Only local storage failures are returned as `Err`; remote rejections
    /// are reported in the [`WriteOutcome`].
    pub async fn add_or_update(&self, entity: Entity) -> ServiceResult<WriteOutcome> {
        self.init().await?;
        if self.is_connected().await {
            match self.remote_save(entity.clone()).await? {
                RemoteWrite::Done(outcome) => return Ok(outcome),
                RemoteWrite::Unavailable(e) => {
                    debug!(entity_type = %self.entity_type, error = %e, "saving offline");
                }
            }
        }
        self.save_offline(entity)
    }

    /// Replays a queued save. Never queues.
    ///
    /// # Errors
    ///
    /// Only local storage failures are returned as `Err`.
    pub async fn replay_add_or_update(&self, entity: Entity) -> ServiceResult<WriteOutcome> {
        self.init().await?;
        match self.remote_save(entity.clone()).await? {
            RemoteWrite::Done(outcome) => Ok(outcome),
            RemoteWrite::Unavailable(e) => Ok(WriteOutcome::failure(entity, e)),
        }
    }

    async fn remote_save(&self, entity: Entity) -> ServiceResult<RemoteWrite> {
        let outgoing = self.hooks.to_storage_format(entity.clone());

        match self.remote.write(&self.entity_type, &outgoing).await {
            Ok(saved) => {
                let saved = self.hooks.to_storage_format(saved);
                let old_id = entity.id.clone();
                let stored = self.db().transaction(|txn| {
                    if old_id != saved.id {
                        self.store.delete_in_txn(txn, &old_id)?;
                    }
                    self.store.put_in_txn(txn, saved, None)
                })?;
                debug!(
                    entity_type = %self.entity_type,
                    old = %old_id,
                    key = %stored.id,
                    "saved remotely"
                );
                Ok(RemoteWrite::Done(WriteOutcome::success(stored)))
            }
            Err(error) if error.is_conflict() => {
                let latest = match self.remote.fetch_by_id(&self.entity_type, &entity.id).await {
                    Ok(Some(latest)) => {
                        let latest = self.hooks.to_storage_format(latest);
                        let stored = self.db().transaction(|txn| {
                            if entity.id.is_temporary() && entity.id != latest.id {
                                self.store.delete_in_txn(txn, &entity.id)?;
                            }
                            self.store.put_in_txn(txn, latest, None)
                        })?;
                        Some(stored)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        debug!(error = %e, "could not fetch conflicting entity");
                        None
                    }
                };
                warn!(entity_type = %self.entity_type, key = %entity.id, "version conflict");
                Ok(RemoteWrite::Done(WriteOutcome::failure(
                    latest.unwrap_or(entity),
                    error,
                )))
            }
            Err(error) if error.is_unavailable() => Ok(RemoteWrite::Unavailable(error)),
            Err(error) => Ok(RemoteWrite::Done(WriteOutcome::failure(entity, error))),
        }
    }

    fn save_offline(&self, entity: Entity) -> ServiceResult<WriteOutcome> {
        let entity = self.hooks.to_storage_format(entity);
        let stored = self.db().transaction(|txn| {
            let stored = self.store.put_in_txn(txn, entity, None)?;
            self.log.enqueue_in_txn(
                txn,
                &self.entity_type,
                OperationKind::AddOrUpdate,
                stored.clone(),
            )?;
            Ok(stored)
        })?;
        info!(entity_type = %self.entity_type, key = %stored.id, "queued offline save");
        Ok(WriteOutcome::success(stored))
    }

    /// Deletes an entity.
    ///
    /// A record that never reached the remote (temporary id) is removed
    /// locally together with its pending operations; nothing is queued.
    ///
    /// # Errors
    ///
    /// Only local storage failures are returned as `Err`.
    pub async fn delete(&self, entity: Entity) -> ServiceResult<WriteOutcome> {
        self.init().await?;

        if entity.id.is_temporary() {
            let dropped = self.db().transaction(|txn| {
                self.store.delete_in_txn(txn, &entity.id)?;
                self.log
                    .remove_for_entity_in_txn(txn, &self.entity_type, &entity.id)
            })?;
            debug!(
                entity_type = %self.entity_type,
                key = %entity.id,
                dropped,
                "deleted unsynchronised record"
            );
            return Ok(WriteOutcome::success(entity));
        }

        if self.is_connected().await {
            match self.remote_delete(entity.clone()).await? {
                RemoteWrite::Done(outcome) => return Ok(outcome),
                RemoteWrite::Unavailable(e) => {
                    debug!(entity_type = %self.entity_type, error = %e, "deleting offline");
                }
            }
        }
        self.delete_offline(entity)
    }

    /// Replays a queued delete. Never queues.
    ///
    /// # Errors
    ///
    /// Only local storage failures are returned as `Err`.
    pub async fn replay_delete(&self, entity: Entity) -> ServiceResult<WriteOutcome> {
        self.init().await?;
        match self.remote_delete(entity.clone()).await? {
            RemoteWrite::Done(outcome) => Ok(outcome),
            RemoteWrite::Unavailable(e) => Ok(WriteOutcome::failure(entity, e)),
        }
    }

    async fn remote_delete(&self, entity: Entity) -> ServiceResult<RemoteWrite> {
        match self.remote.delete(&self.entity_type, &entity).await {
            Ok(()) => {
                self.store.delete(&entity.id)?;
                debug!(entity_type = %self.entity_type, key = %entity.id, "deleted remotely");
                Ok(RemoteWrite::Done(WriteOutcome::success(entity)))
            }
            Err(error) if error.is_unavailable() => Ok(RemoteWrite::Unavailable(error)),
            Err(error) => Ok(RemoteWrite::Done(WriteOutcome::failure(entity, error))),
        }
    }

    fn delete_offline(&self, entity: Entity) -> ServiceResult<WriteOutcome> {
        let snapshot = Entity {
            payload: None,
            ..self.hooks.to_storage_format(entity.clone())
        };
        self.db().transaction(|txn| {
            self.store.delete_in_txn(txn, &entity.id)?;
            self.log
                .enqueue_in_txn(txn, &self.entity_type, OperationKind::Delete, snapshot)?;
            Ok(())
        })?;
        info!(entity_type = %self.entity_type, key = %entity.id, "queued offline delete");
        Ok(WriteOutcome::success(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::freshness::CachePolicy;
    use crate::remote::MockRemote;
    use crate::schema::{EntitySchema, FieldKind, FieldSpec, SchemaHooks};
    use async_trait::async_trait;
    use replica_core::FieldValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        service: DataService,
        remote: Arc<MockRemote>,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: ServiceConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let remote = Arc::new(MockRemote::new().with_clock(clock.clone()));
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = DataService::new("task", db, remote.clone())
            .with_clock(clock.clone())
            .with_config(config);
        Fixture {
            service,
            remote,
            clock,
        }
    }

    fn seeded(config: ServiceConfig) -> Fixture {
        let f = fixture(config);
        f.remote.seed(
            "task",
            vec![
                Entity::new("a").with_id(1).with_version(1).with_field("owner", "ann"),
                Entity::new("b").with_id(2).with_version(1).with_field("owner", "bob"),
            ],
        );
        f
    }

    #[tokio::test]
    async fn get_all_caches_within_max_age() {
        let f = seeded(ServiceConfig::new().with_cache_policy(CachePolicy::from_millis(60_000)));

        assert_eq!(f.service.get_all().await.unwrap().len(), 2);
        assert_eq!(f.service.get_all().await.unwrap().len(), 2);
        assert_eq!(f.remote.fetch_count(), 1);
        assert_eq!(f.service.store().count().unwrap(), 2);

        f.clock.advance(Duration::from_secs(61));
        f.service.get_all().await.unwrap();
        assert_eq!(f.remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn always_policy_refreshes_every_read() {
        let f = seeded(ServiceConfig::new().with_cache_policy(CachePolicy::Always));
        f.service.get_all().await.unwrap();
        f.service.get_all().await.unwrap();
        assert_eq!(f.remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_get_all_fetches_once() {
        let f = seeded(ServiceConfig::new().with_cache_policy(CachePolicy::Always));
        f.remote.set_delay(Some(Duration::from_millis(20)));

        let (a, b) = tokio::join!(f.service.get_all(), f.service.get_all());
        assert_eq!(a.unwrap().len(), 2);
        assert_eq!(b.unwrap().len(), 2);
        assert_eq!(f.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_queries_fetch_once() {
        let f = seeded(ServiceConfig::new().with_cache_policy(CachePolicy::Always));
        f.remote.set_delay(Some(Duration::from_millis(20)));
        let query = Query::new().filter("owner", "bob");

        let (a, b) = tokio::join!(f.service.get(&query), f.service.get(&query));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
        assert_eq!(f.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_remote_serves_local_data() {
        let f = seeded(
            ServiceConfig::new()
                .with_cache_policy(CachePolicy::Always)
                .with_check_connectivity(true),
        );
        f.service.get_all().await.unwrap();

        f.remote.set_reachable(false);
        let local = f.service.get_all().await.unwrap();
        assert_eq!(local.len(), 2);
        assert_eq!(f.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_fetch_falls_back_to_local() {
        let f = seeded(ServiceConfig::new().with_cache_policy(CachePolicy::Always));
        f.service.get_all().await.unwrap();

        f.remote.fail_next_fetch(ServiceError::unavailable("timeout"));
        assert_eq!(f.service.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn other_fetch_errors_propagate() {
        let f = seeded(ServiceConfig::new());
        f.remote.fail_next_fetch(ServiceError::remote("500"));

        let result = f.service.get_all().await;
        assert!(matches!(result, Err(ServiceError::Remote(_))));
    }

    #[tokio::test]
    async fn refresh_keeps_unsynchronised_records() {
        let f = seeded(ServiceConfig::new().with_cache_policy(CachePolicy::Always));

        f.remote.set_reachable(false);
        let draft = f
            .service
            .add_or_update(Entity::new("draft"))
            .await
            .unwrap()
            .entity;
        assert!(draft.id.is_temporary());

        f.remote.set_reachable(true);
        let fetched = f.service.get_all().await.unwrap();
        assert_eq!(fetched.len(), 2);

        let local = f.service.store().get_all().unwrap();
        assert_eq!(local.len(), 3);
        assert!(f.service.store().get(&draft.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn last_modified_skips_unchanged_refresh() {
        let f = seeded(
            ServiceConfig::new()
                .with_cache_policy(CachePolicy::from_millis(1_000))
                .with_last_modified(true),
        );

        f.service.get_all().await.unwrap();
        assert_eq!(f.remote.fetch_count(), 1);

        f.clock.advance(Duration::from_secs(2));
        f.service.get_all().await.unwrap();
        assert_eq!(f.remote.fetch_count(), 1);

        f.remote.write("task", &Entity::new("c")).await.unwrap();
        f.service.get_all().await.unwrap();
        assert_eq!(f.remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn query_results_are_tagged_for_offline_use() {
        let f = seeded(ServiceConfig::new().with_cache_policy(CachePolicy::Always));
        let query = Query::new().filter("owner", "bob");

        let online = f.service.get(&query).await.unwrap();
        assert_eq!(online.len(), 1);
        assert!(online[0].has_tag(&query.tag()));

        f.remote.set_reachable(false);
        let offline = f.service.get(&query).await.unwrap();
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].title, "b");
    }

    #[tokio::test]
    async fn by_id_reads() {
        let f = seeded(ServiceConfig::new());

        let one = f.service.get_by_id(&EntityKey::Int(2)).await.unwrap();
        assert_eq!(one.unwrap().title, "b");
        assert!(f.service.get_by_id(&EntityKey::Int(9)).await.unwrap().is_none());

        let many = f
            .service
            .get_by_ids(&[EntityKey::Int(1), EntityKey::Int(9), EntityKey::Int(2)])
            .await
            .unwrap();
        assert_eq!(many.len(), 2);

        f.remote.set_reachable(false);
        f.clock.advance(Duration::from_secs(3_600));
        let local = f
            .service
            .get_by_ids(&[EntityKey::Int(1), EntityKey::Int(2)])
            .await
            .unwrap();
        assert_eq!(local.len(), 2);
    }

    #[tokio::test]
    async fn online_create_takes_remote_identity() {
        let f = fixture(ServiceConfig::new());

        let outcome = f.service.add_or_update(Entity::new("a")).await.unwrap();
        assert!(outcome.is_ok());
        assert_eq!(outcome.entity.id, EntityKey::Int(100));
        assert_eq!(outcome.entity.version, Some(1));

        let local = f.service.store().get_all().unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, EntityKey::Int(100));
        assert!(f.service.log().is_empty());
    }

    #[tokio::test]
    async fn offline_save_queues_with_temporary_id() {
        let f = fixture(ServiceConfig::new());
        f.remote.set_reachable(false);

        let outcome = f.service.add_or_update(Entity::new("a")).await.unwrap();
        assert!(outcome.is_ok());
        assert_eq!(outcome.entity.id, EntityKey::Int(-2));

        let ops = f.service.log().all().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::AddOrUpdate);
        assert_eq!(ops[0].snapshot.id, EntityKey::Int(-2));
        assert_eq!(ops[0].entity_type, "task");
    }

    #[tokio::test]
    async fn check_connectivity_skips_remote_write() {
        let f = fixture(ServiceConfig::new().with_check_connectivity(true));
        f.remote.set_reachable(false);

        f.service.add_or_update(Entity::new("a")).await.unwrap();
        assert_eq!(f.service.log().len(), 1);
        assert!(f.remote.write_log().is_empty());
    }

    #[tokio::test]
    async fn replay_replaces_temporary_record() {
        let f = fixture(ServiceConfig::new());
        f.remote.set_reachable(false);
        let draft = f.service.add_or_update(Entity::new("a")).await.unwrap().entity;

        let failed = f.service.replay_add_or_update(draft.clone()).await.unwrap();
        assert!(failed.error.as_ref().is_some_and(ServiceError::is_unavailable));

        f.remote.set_reachable(true);
        let outcome = f.service.replay_add_or_update(draft.clone()).await.unwrap();
        assert!(outcome.is_ok());
        assert!(f.service.store().get(&draft.id).unwrap().is_none());
        assert!(f.service.store().get(&outcome.entity.id).unwrap().is_some());
        // Replay never touches the queue itself.
        assert_eq!(f.service.log().len(), 1);
    }

    #[tokio::test]
    async fn conflict_returns_authoritative_copy() {
        let f = fixture(ServiceConfig::new());
        f.remote
            .seed("task", vec![Entity::new("remote title").with_id(5).with_version(3)]);

        let outcome = f
            .service
            .add_or_update(Entity::new("stale edit").with_id(5).with_version(2))
            .await
            .unwrap();

        assert!(outcome.error.as_ref().is_some_and(ServiceError::is_conflict));
        assert_eq!(outcome.entity.title, "remote title");
        assert_eq!(outcome.entity.version, Some(3));

        let local = f.service.store().get(&EntityKey::Int(5)).unwrap().unwrap();
        assert_eq!(local.title, "remote title");
    }

    #[tokio::test]
    async fn rejected_write_changes_nothing_locally() {
        let f = fixture(ServiceConfig::new());
        f.remote.fail_next_write(ServiceError::remote("validation failed"));

        let outcome = f
            .service
            .add_or_update(Entity::new("bad").with_id(7))
            .await
            .unwrap();

        assert!(matches!(outcome.error, Some(ServiceError::Remote(_))));
        assert_eq!(outcome.entity.title, "bad");
        assert_eq!(f.service.store().count().unwrap(), 0);
        assert!(f.service.log().is_empty());
    }

    #[tokio::test]
    async fn deleting_unsynchronised_record_drops_its_operations() {
        let f = fixture(ServiceConfig::new());
        f.remote.set_reachable(false);
        let draft = f.service.add_or_update(Entity::new("a")).await.unwrap().entity;
        let draft = f
            .service
            .add_or_update(Entity { title: "a2".into(), ..draft })
            .await
            .unwrap()
            .entity;
        assert_eq!(f.service.log().len(), 2);

        f.service.delete(draft.clone()).await.unwrap();
        assert!(f.service.log().is_empty());
        assert!(f.service.store().get(&draft.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_delete_queues() {
        let f = fixture(ServiceConfig::new());
        let stored = f
            .service
            .store()
            .put(Entity::new("a").with_id(5).with_payload(vec![1, 2, 3]))
            .unwrap();
        f.remote.set_reachable(false);

        let outcome = f.service.delete(stored).await.unwrap();
        assert!(outcome.is_ok());
        assert_eq!(f.service.store().count().unwrap(), 0);

        let ops = f.service.log().all().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Delete);
        assert!(ops[0].snapshot.payload.is_none());
    }

    #[tokio::test]
    async fn online_delete() {
        let f = seeded(ServiceConfig::new());
        f.service.get_all().await.unwrap();
        let target = f.service.store().get(&EntityKey::Int(1)).unwrap().unwrap();

        let outcome = f.service.delete(target).await.unwrap();
        assert!(outcome.is_ok());
        assert!(f.remote.get("task", &EntityKey::Int(1)).is_none());
        assert!(f.service.store().get(&EntityKey::Int(1)).unwrap().is_none());
        assert!(f.service.log().is_empty());
    }

    struct CountingHooks {
        inits: AtomicUsize,
    }

    #[async_trait]
    impl EntityHooks for CountingHooks {
        async fn init(&self) -> ServiceResult<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn init_runs_once() {
        let hooks = Arc::new(CountingHooks {
            inits: AtomicUsize::new(0),
        });
        let f = seeded(ServiceConfig::new());
        let service = f.service.clone().with_hooks(hooks.clone());

        service.get_all().await.unwrap();
        service.add_or_update(Entity::new("x")).await.unwrap();
        service.init().await.unwrap();
        assert_eq!(hooks.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schema_hooks_shape_stored_and_read_entities() {
        let schema = EntitySchema::new("task")
            .field(FieldSpec::new("owner", FieldKind::Text))
            .field(FieldSpec::new("done", FieldKind::Bool).with_default(false));
        let f = seeded(ServiceConfig::new());
        let service = f
            .service
            .clone()
            .with_hooks(Arc::new(SchemaHooks::new(schema)));

        let all = service.get_all().await.unwrap();
        assert!(all
            .iter()
            .all(|e| e.field("done") == Some(&FieldValue::Bool(false))));
    }

    #[test]
    fn label_falls_back_to_entity_type() {
        let f = fixture(ServiceConfig::new());
        assert_eq!(f.service.label(), "task");

        let labelled = f
            .service
            .clone()
            .with_config(ServiceConfig::new().with_label("Task"));
        assert_eq!(labelled.label(), "Task");
    }
}
