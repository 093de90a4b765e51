//! Integration tests for replaying offline writes.

use async_trait::async_trait;
use parking_lot::Mutex;
use replica_core::{
    Database, Entity, EntityKey, FieldValue, LocalStore, OperationKind, Query, TransactionLog,
};
use replica_service::{
    DataService, EntitySchema, FieldKind, FieldSpec, MockRemote, RemoteAdapter, SchemaHooks,
    ServiceConfig, ServiceError, ServiceResult,
};
use replica_sync::{ServiceRegistry, SyncConfig, SyncEngine, SyncError, SyncState};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A remote answering writes and lookups from a script.
#[derive(Default)]
struct ScriptedRemote {
    writes: Mutex<VecDeque<ServiceResult<Entity>>>,
    lookup: Mutex<Option<Entity>>,
}

impl ScriptedRemote {
    fn answer_write(&self, result: ServiceResult<Entity>) {
        self.writes.lock().push_back(result);
    }

    fn answer_lookup(&self, entity: Entity) {
        *self.lookup.lock() = Some(entity);
    }
}

#[async_trait]
impl RemoteAdapter for ScriptedRemote {
    async fn fetch_all(&self, _entity_type: &str) -> ServiceResult<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn fetch_by_query(&self, _entity_type: &str, _query: &Query) -> ServiceResult<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn fetch_by_id(
        &self,
        _entity_type: &str,
        _id: &EntityKey,
    ) -> ServiceResult<Option<Entity>> {
        Ok(self.lookup.lock().clone())
    }

    async fn fetch_by_ids(
        &self,
        _entity_type: &str,
        _ids: &[EntityKey],
    ) -> ServiceResult<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn write(&self, _entity_type: &str, _entity: &Entity) -> ServiceResult<Entity> {
        self.writes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::remote("no scripted answer")))
    }

    async fn delete(&self, _entity_type: &str, _entity: &Entity) -> ServiceResult<()> {
        Ok(())
    }

    async fn check_reachable(&self) -> bool {
        true
    }
}

/// Queues a create of a new "Note" titled `title` without touching any remote.
fn queue_offline_create(db: &Arc<Database>, title: &str) -> Entity {
    let store = LocalStore::new(Arc::clone(db), "Note");
    let log = TransactionLog::new(Arc::clone(db));
    db.transaction(|txn| {
        let stored = store.put_in_txn(txn, Entity::new(title), None)?;
        log.enqueue_in_txn(txn, "Note", OperationKind::AddOrUpdate, stored.clone())?;
        Ok(stored)
    })
    .unwrap()
}

fn note_engine(db: &Arc<Database>, remote: Arc<dyn RemoteAdapter>) -> (SyncEngine, DataService) {
    let notes = DataService::new("Note", Arc::clone(db), remote)
        .with_config(ServiceConfig::new().with_label("Note"));
    let registry = ServiceRegistry::new().with("Note", notes.clone()).unwrap();
    let engine = SyncEngine::new(TransactionLog::new(Arc::clone(db)), registry);
    (engine, notes)
}

#[tokio::test]
async fn replayed_create_takes_permanent_identity() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let draft = queue_offline_create(&db, "a");
    assert_eq!(draft.id, EntityKey::Int(-2));

    let remote = Arc::new(ScriptedRemote::default());
    remote.answer_write(Ok(Entity::new("a").with_id(7).with_version(1)));
    let (engine, notes) = note_engine(&db, remote);

    let errors = engine.run().await.unwrap();
    assert!(errors.is_empty());
    assert!(engine.log().is_empty());

    let stored = notes.store().get(&EntityKey::Int(7)).unwrap().unwrap();
    assert_eq!(stored.title, "a");
    assert_eq!(stored.version, Some(1));
    assert!(notes.store().get(&EntityKey::Int(-2)).unwrap().is_none());
}

#[tokio::test]
async fn conflicting_create_is_abandoned_for_remote_copy() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    queue_offline_create(&db, "a");

    let remote = Arc::new(ScriptedRemote::default());
    remote.answer_write(Err(ServiceError::conflict("Note", EntityKey::Int(-2))));
    remote.answer_lookup(Entity::new("b").with_id(2).with_version(3));
    let (engine, notes) = note_engine(&db, remote);

    let errors = engine.run().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Note save failed for \"a\" (id -2)"));
    assert!(engine.log().is_empty());

    let stored = notes.store().get(&EntityKey::Int(2)).unwrap().unwrap();
    assert_eq!(stored.title, "b");
    assert_eq!(stored.version, Some(3));
    assert!(notes.store().get(&EntityKey::Int(-2)).unwrap().is_none());
}

#[tokio::test]
async fn later_operations_follow_remapped_identifier() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let remote = Arc::new(MockRemote::new());
    let (engine, notes) = note_engine(&db, remote.clone());

    remote.set_reachable(false);
    let draft = notes.add_or_update(Entity::new("a")).await.unwrap().entity;
    notes
        .add_or_update(Entity {
            title: "a2".into(),
            ..draft.clone()
        })
        .await
        .unwrap();
    assert_eq!(engine.log().len(), 2);

    remote.set_reachable(true);
    let errors = engine.run().await.unwrap();
    assert!(errors.is_empty(), "{errors:?}");
    assert!(engine.log().is_empty());

    assert_eq!(
        remote.write_log(),
        vec![
            ("Note".to_string(), "a".to_string()),
            ("Note".to_string(), "a2".to_string())
        ]
    );
    let remote_copy = remote.get("Note", &EntityKey::Int(100)).unwrap();
    assert_eq!(remote_copy.title, "a2");
    assert_eq!(remote_copy.version, Some(2));

    let local = notes.store().get_all().unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, EntityKey::Int(100));
    assert_eq!(local[0].title, "a2");

    let stats = engine.stats();
    assert_eq!(stats.ids_remapped, 1);
    assert_eq!(stats.operations_committed, 2);
}

#[tokio::test]
async fn updates_wait_for_their_failed_create() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let remote = Arc::new(MockRemote::new());
    let (engine, notes) = note_engine(&db, remote.clone());

    remote.set_reachable(false);
    let draft = notes.add_or_update(Entity::new("a")).await.unwrap().entity;
    notes
        .add_or_update(Entity {
            title: "a2".into(),
            ..draft.clone()
        })
        .await
        .unwrap();
    remote.set_reachable(true);

    remote.fail_next_write(ServiceError::remote("500"));
    let errors = engine.run().await.unwrap();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].starts_with("Note save failed for \"a\" (id -2)"));
    assert!(remote.entities("Note").is_empty());

    let queued = engine.log().all().unwrap();
    let titles: Vec<&str> = queued.iter().map(|op| op.snapshot.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "a2"]);
    assert_eq!(queued[0].attempts, 1);
    assert_eq!(queued[1].attempts, 0);

    let errors = engine.run().await.unwrap();
    assert!(errors.is_empty(), "{errors:?}");
    assert!(engine.log().is_empty());

    let on_remote = remote.entities("Note");
    assert_eq!(on_remote.len(), 1);
    assert_eq!(on_remote[0].title, "a2");

    let local = notes.store().get_all().unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, on_remote[0].id);
    assert_eq!(local[0].title, "a2");
}

#[tokio::test]
async fn remapped_delete_targets_permanent_identifier() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let remote = Arc::new(MockRemote::new());
    let (engine, notes) = note_engine(&db, remote.clone());

    // Services drop temporary records instead of queueing their deletes.
    let draft = queue_offline_create(&db, "short lived");
    engine
        .log()
        .enqueue("Note", OperationKind::Delete, draft.clone())
        .unwrap();

    let errors = engine.run().await.unwrap();
    assert!(errors.is_empty(), "{errors:?}");
    assert!(remote.entities("Note").is_empty());
    assert_eq!(notes.store().count().unwrap(), 0);
}

#[tokio::test]
async fn conflicts_are_dropped_and_other_failures_kept() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let remote = Arc::new(MockRemote::new());
    remote.seed("Note", vec![Entity::new("server").with_id(5).with_version(3)]);
    let (engine, notes) = note_engine(&db, remote.clone());

    remote.set_reachable(false);
    notes
        .add_or_update(Entity::new("rejected").with_id(6))
        .await
        .unwrap();
    notes
        .add_or_update(Entity::new("stale").with_id(5).with_version(1))
        .await
        .unwrap();
    remote.set_reachable(true);

    remote.fail_next_write(ServiceError::remote("validation failed"));
    let errors = engine.run().await.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("\"rejected\""));
    assert!(errors[0].contains("validation failed"));
    assert!(errors[1].contains("\"stale\""));
    assert!(errors[1].contains("version conflict"));

    let queued = engine.log().all().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].snapshot.title, "rejected");
    assert_eq!(queued[0].attempts, 1);

    remote.fail_next_write(ServiceError::remote("validation failed"));
    let errors = engine.run().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("\"rejected\""));

    let queued = engine.log().all().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 2);
    assert!(queued.iter().all(|op| op.snapshot.title != "stale"));

    let stats = engine.stats();
    assert_eq!(stats.runs_completed, 2);
    assert_eq!(stats.operations_abandoned, 1);
    assert_eq!(stats.operations_retained, 2);
}

#[tokio::test]
async fn references_in_other_types_follow_remap() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let remote = Arc::new(MockRemote::new());

    let projects = DataService::new("project", Arc::clone(&db), remote.clone());
    let task_schema = EntitySchema::new("task")
        .field(FieldSpec::new("project", FieldKind::Integer).references("project"));
    let tasks = DataService::new("task", Arc::clone(&db), remote.clone())
        .with_hooks(Arc::new(SchemaHooks::new(task_schema)));
    let registry = ServiceRegistry::new()
        .with("project", projects.clone())
        .unwrap()
        .with("task", tasks.clone())
        .unwrap();
    let engine = SyncEngine::new(TransactionLog::new(Arc::clone(&db)), registry);

    remote.set_reachable(false);
    let project = projects
        .add_or_update(Entity::new("launch"))
        .await
        .unwrap()
        .entity;
    let project_id = project.id.as_int().unwrap();
    tasks
        .add_or_update(Entity::new("write notes").with_field("project", project_id))
        .await
        .unwrap();

    remote.set_reachable(true);
    let errors = engine.run().await.unwrap();
    assert!(errors.is_empty(), "{errors:?}");

    let remote_project = &remote.entities("project")[0];
    let remote_task = &remote.entities("task")[0];
    assert_eq!(
        remote_task.field("project"),
        Some(&remote_project.id.to_field_value())
    );
    assert_eq!(remote_task.field("project"), Some(&FieldValue::Integer(100)));
}

#[tokio::test]
async fn bounded_retries_abandon_exhausted_operations() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let remote = Arc::new(MockRemote::new());
    let (engine, notes) = note_engine(&db, remote.clone());
    let engine = engine.with_config(SyncConfig::new().with_max_attempts(2));

    remote.set_reachable(false);
    notes.add_or_update(Entity::new("a")).await.unwrap();

    let errors = engine.run().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(engine.log().len(), 1);

    let errors = engine.run().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].ends_with("(abandoned after 2 attempts)"));
    assert!(engine.log().is_empty());
    assert_eq!(engine.stats().operations_abandoned, 1);
}

#[tokio::test]
async fn unknown_entity_type_is_kept() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let remote = Arc::new(MockRemote::new());
    let (engine, _) = note_engine(&db, remote.clone());

    engine
        .log()
        .enqueue("Invoice", OperationKind::AddOrUpdate, Entity::new("inv-1").with_id(-2))
        .unwrap();
    queue_offline_create(&db, "a");

    let errors = engine.run().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Invoice save failed for \"inv-1\""));
    assert!(errors[0].contains("no data service registered"));

    let queued = engine.log().all().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].entity_type, "Invoice");
    assert_eq!(remote.entities("Note").len(), 1);
}

#[tokio::test]
async fn concurrent_run_is_rejected() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let remote = Arc::new(MockRemote::new());
    let (engine, _) = note_engine(&db, remote.clone());
    queue_offline_create(&db, "a");
    remote.set_delay(Some(Duration::from_millis(50)));

    let (first, second) = tokio::join!(engine.run(), engine.run());
    assert!(first.unwrap().is_empty());
    assert!(matches!(
        second,
        Err(SyncError::InvalidStateTransition { .. })
    ));
    assert_eq!(engine.state(), SyncState::Idle);
    assert!(engine.log().is_empty());
}

#[tokio::test]
async fn queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    {
        let db = Arc::new(Database::open(&path).unwrap());
        queue_offline_create(&db, "a");
    }

    let db = Arc::new(Database::open(&path).unwrap());
    let remote = Arc::new(MockRemote::new());
    let (engine, notes) = note_engine(&db, remote.clone());
    assert_eq!(engine.log().len(), 1);

    let errors = engine.run().await.unwrap();
    assert!(errors.is_empty());
    assert_eq!(notes.store().get_all().unwrap()[0].id, EntityKey::Int(100));
}
