//! Queue of writes made while offline.
//!
//! Entries live in [`QUEUE_TABLE`], keyed by their insertion sequence so a
//! table scan returns them in order. A snapshot carrying a binary payload is
//! split on the way in: the payload goes to [`BLOB_TABLE`] under a synthetic
//! key `"<timestamp>_<originalKey>"`, and the queue entry keeps the snapshot
//! without payload, re-keyed to the synthetic key, plus the original key.

use crate::database::{Database, TableRead, Transaction};
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::key::EntityKey;
use crate::meta::{read_counter, write_counter};
use crate::now_millis;
use crate::record::{decode, encode};
use crate::store::LocalStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Table holding queued operations.
pub const QUEUE_TABLE: &str = "__pending_operations";

/// Table holding payloads of queued snapshots.
pub const BLOB_TABLE: &str = "__pending_blobs";

const SEQUENCE_COUNTER: &str = "oplog:sequence";

/// Kind of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Create or update the entity remotely.
    AddOrUpdate,
    /// Delete the entity remotely.
    Delete,
}

impl OperationKind {
    /// Returns the label used in user-facing messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            OperationKind::AddOrUpdate => "save",
            OperationKind::Delete => "delete",
        }
    }
}

/// A write waiting to be replayed against the remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Unique identifier of this entry.
    pub operation_id: Uuid,
    /// Insertion order, strictly increasing.
    pub sequence: u64,
    /// Entity type the snapshot belongs to.
    pub entity_type: String,
    /// What to do remotely.
    pub kind: OperationKind,
    /// The entity as it was written locally.
    pub snapshot: Entity,
    /// When the entry was queued (ms since epoch).
    pub queued_at: u64,
    /// Failed replay attempts so far.
    pub attempts: u32,
    blob_key: Option<String>,
}

impl PendingOperation {
    /// Returns the identifier of the entity this entry targets.
    #[must_use]
    pub fn entity_id(&self) -> &EntityKey {
        &self.snapshot.id
    }

    /// Returns the synthetic key under which the payload is stored.
    #[must_use]
    pub fn blob_key(&self) -> Option<&str> {
        self.blob_key.as_deref()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredOperation {
    operation_id: Uuid,
    sequence: u64,
    entity_type: String,
    kind: OperationKind,
    snapshot: Entity,
    #[serde(default)]
    original_key: Option<EntityKey>,
    #[serde(default)]
    blob_key: Option<String>,
    queued_at: u64,
    #[serde(default)]
    attempts: u32,
}

fn queue_key(sequence: u64) -> EntityKey {
    EntityKey::Int(sequence as i64)
}

/// The ordered queue of pending operations.
#[derive(Clone)]
pub struct TransactionLog {
    db: Arc<Database>,
    blobs: LocalStore,
}

impl TransactionLog {
    /// Creates a queue stored in `db`.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        let blobs = LocalStore::new(Arc::clone(&db), BLOB_TABLE);
        Self { db, blobs }
    }

    /// Returns the underlying database.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Appends an operation.
    ///
    /// # Errors
    ///
    /// Returns any storage error; nothing is queued in that case.
    pub fn enqueue(
        &self,
        entity_type: &str,
        kind: OperationKind,
        snapshot: Entity,
    ) -> CoreResult<PendingOperation> {
        self.db
            .transaction(|txn| self.enqueue_in_txn(txn, entity_type, kind, snapshot))
    }

    /// Appends an operation inside `txn`.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn enqueue_in_txn(
        &self,
        txn: &mut Transaction<'_>,
        entity_type: &str,
        kind: OperationKind,
        mut snapshot: Entity,
    ) -> CoreResult<PendingOperation> {
        let sequence = read_counter(txn, SEQUENCE_COUNTER)?.unwrap_or(0) + 1;
        write_counter(txn, SEQUENCE_COUNTER, sequence);
        snapshot.resolved.clear();

        let mut op = PendingOperation {
            operation_id: Uuid::new_v4(),
            sequence: sequence as u64,
            entity_type: entity_type.to_string(),
            kind,
            snapshot,
            queued_at: now_millis(),
            attempts: 0,
            blob_key: None,
        };
        self.write_in_txn(txn, &mut op)?;

        debug!(
            entity_type,
            key = %op.snapshot.id,
            sequence = op.sequence,
            kind = op.kind.label(),
            "queued operation"
        );
        Ok(op)
    }

    fn write_in_txn(&self, txn: &mut Transaction<'_>, op: &mut PendingOperation) -> CoreResult<()> {
        let mut snapshot = Entity {
            resolved: Default::default(),
            ..op.snapshot.clone()
        };
        let mut original_key = None;

        match snapshot.payload.take() {
            Some(payload) => {
                let blob_key = match &op.blob_key {
                    Some(key) => key.clone(),
                    None => self.fresh_blob_key(txn, &snapshot.id),
                };
                let blob = Entity {
                    id: EntityKey::Text(blob_key.clone()),
                    payload: Some(payload),
                    ..Entity::default()
                };
                self.blobs.write_record(txn, &blob)?;

                original_key = Some(std::mem::replace(
                    &mut snapshot.id,
                    EntityKey::Text(blob_key.clone()),
                ));
                op.blob_key = Some(blob_key);
            }
            None => {
                if let Some(stale) = op.blob_key.take() {
                    self.blobs.delete_in_txn(txn, &EntityKey::Text(stale))?;
                }
            }
        }

        let stored = StoredOperation {
            operation_id: op.operation_id,
            sequence: op.sequence,
            entity_type: op.entity_type.clone(),
            kind: op.kind,
            snapshot,
            original_key,
            blob_key: op.blob_key.clone(),
            queued_at: op.queued_at,
            attempts: op.attempts,
        };
        txn.put(QUEUE_TABLE, queue_key(op.sequence), encode(&stored)?);
        Ok(())
    }

    fn fresh_blob_key(&self, txn: &Transaction<'_>, original: &EntityKey) -> String {
        let mut timestamp = now_millis();
        loop {
            let key = format!("{timestamp}_{original}");
            if txn.get(BLOB_TABLE, &EntityKey::Text(key.clone())).is_none() {
                return key;
            }
            timestamp += 1;
        }
    }

    /// Removes an operation. Returns whether it was still queued.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn dequeue(&self, op: &PendingOperation) -> CoreResult<bool> {
        self.dequeue_by_sequence(op.sequence)
    }

    /// Removes the operation with the given sequence number.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn dequeue_by_sequence(&self, sequence: u64) -> CoreResult<bool> {
        self.db
            .transaction(|txn| self.dequeue_in_txn(txn, sequence))
    }

    /// Removes an operation inside `txn`, its payload first.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn dequeue_in_txn(&self, txn: &mut Transaction<'_>, sequence: u64) -> CoreResult<bool> {
        let key = queue_key(sequence);
        let Some(bytes) = txn.get(QUEUE_TABLE, &key) else {
            return Ok(false);
        };

        let stored: StoredOperation = decode(&bytes)?;
        if let Some(blob_key) = stored.blob_key {
            self.blobs.delete_in_txn(txn, &EntityKey::Text(blob_key))?;
        }
        txn.delete(QUEUE_TABLE, &key);

        debug!(sequence, entity_type = %stored.entity_type, "dequeued operation");
        Ok(true)
    }

    /// Rewrites a queued operation in place.
    ///
    /// Returns `false` without writing if the entry is no longer queued.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn update(&self, op: &PendingOperation) -> CoreResult<bool> {
        self.db.transaction(|txn| self.update_in_txn(txn, op))
    }

    /// Like [`TransactionLog::update`], inside `txn`.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn update_in_txn(&self, txn: &mut Transaction<'_>, op: &PendingOperation) -> CoreResult<bool> {
        if txn.get(QUEUE_TABLE, &queue_key(op.sequence)).is_none() {
            return Ok(false);
        }
        let mut op = op.clone();
        self.write_in_txn(txn, &mut op)?;
        Ok(true)
    }

    /// Returns every queued operation in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be decoded.
    pub fn all(&self) -> CoreResult<Vec<PendingOperation>> {
        self.all_from(&self.db.snapshot())
    }

    /// Like [`TransactionLog::all`], reading through `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be decoded.
    pub fn all_from<R: TableRead>(&self, reader: &R) -> CoreResult<Vec<PendingOperation>> {
        reader
            .scan(QUEUE_TABLE)
            .into_iter()
            .map(|(_, bytes)| self.rehydrate(reader, decode(&bytes)?))
            .collect()
    }

    /// Returns the operation with the given sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be decoded.
    pub fn get(&self, sequence: u64) -> CoreResult<Option<PendingOperation>> {
        let snapshot = self.db.snapshot();
        match snapshot.get(QUEUE_TABLE, &queue_key(sequence)) {
            Some(bytes) => Ok(Some(self.rehydrate(&snapshot, decode(&bytes)?)?)),
            None => Ok(None),
        }
    }

    fn rehydrate<R: TableRead>(
        &self,
        reader: &R,
        stored: StoredOperation,
    ) -> CoreResult<PendingOperation> {
        let mut snapshot = stored.snapshot;
        if let Some(original) = stored.original_key {
            snapshot.id = original;
        }
        if let Some(blob_key) = &stored.blob_key {
            snapshot.payload = self
                .blobs
                .get_from(reader, &EntityKey::Text(blob_key.clone()))?
                .and_then(|blob| blob.payload);
        }

        Ok(PendingOperation {
            operation_id: stored.operation_id,
            sequence: stored.sequence,
            entity_type: stored.entity_type,
            kind: stored.kind,
            snapshot,
            queued_at: stored.queued_at,
            attempts: stored.attempts,
            blob_key: stored.blob_key,
        })
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.db.snapshot().keys(QUEUE_TABLE).len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every queued operation and payload.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn clear(&self) -> CoreResult<()> {
        self.db.transaction(|txn| {
            txn.clear(QUEUE_TABLE);
            txn.clear(BLOB_TABLE);
            Ok(())
        })
    }

    /// Removes every operation targeting `key` of `entity_type`.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn remove_for_entity(&self, entity_type: &str, key: &EntityKey) -> CoreResult<usize> {
        self.db
            .transaction(|txn| self.remove_for_entity_in_txn(txn, entity_type, key))
    }

    /// Like [`TransactionLog::remove_for_entity`], inside `txn`.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn remove_for_entity_in_txn(
        &self,
        txn: &mut Transaction<'_>,
        entity_type: &str,
        key: &EntityKey,
    ) -> CoreResult<usize> {
        let targets: Vec<u64> = txn
            .scan(QUEUE_TABLE)
            .into_iter()
            .map(|(_, bytes)| decode::<StoredOperation>(&bytes))
            .collect::<CoreResult<Vec<_>>>()?
            .into_iter()
            .filter(|stored| {
                let id = stored.original_key.as_ref().unwrap_or(&stored.snapshot.id);
                stored.entity_type == entity_type && id == key
            })
            .map(|stored| stored.sequence)
            .collect();

        for sequence in &targets {
            self.dequeue_in_txn(txn, *sequence)?;
        }
        Ok(targets.len())
    }
}
