//! Per-entity-type table handle.

use crate::chunk::{chunk_key, chunk_prefix, parse_chunk_key, reassemble, split_payload};
use crate::database::{Database, TableRead, Transaction};
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::key::EntityKey;
use crate::meta::{read_counter, write_counter};
use crate::record::{decode, encode, StoredRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Handle onto one entity table of a [`Database`].
///
/// Every mutating operation runs in its own transaction. The `*_in_txn`
/// variants write into a caller-supplied transaction instead, so a store
/// write can be committed together with a [`TransactionLog`] enqueue.
///
/// [`TransactionLog`]: crate::TransactionLog
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
    table: String,
    auto_increment: bool,
    chunk_size: usize,
}

impl LocalStore {
    /// Creates a handle onto `table`.
    ///
    /// The chunk size comes from the database configuration.
    #[must_use]
    pub fn new(db: Arc<Database>, table: impl Into<String>) -> Self {
        let chunk_size = db.config().chunk_size;
        Self {
            db,
            table: table.into(),
            auto_increment: false,
            chunk_size,
        }
    }

    /// Makes new records take positive, increasing identifiers instead of
    /// temporary ones.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Overrides the payload chunk size for this table.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the underlying database.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Returns the entity stored under `id`, with its payload reassembled.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored record cannot be decoded.
    pub fn get(&self, id: &EntityKey) -> CoreResult<Option<Entity>> {
        self.get_from(&self.db.snapshot(), id)
    }

    /// Like [`LocalStore::get`], reading through `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored record cannot be decoded.
    pub fn get_from<R: TableRead>(&self, reader: &R, id: &EntityKey) -> CoreResult<Option<Entity>> {
        let Some(bytes) = reader.get(&self.table, id) else {
            return Ok(None);
        };

        match decode(&bytes)? {
            StoredRecord::Entity(mut entity) => {
                let pieces = reader
                    .scan_prefix(&self.table, &chunk_prefix(id))
                    .into_iter()
                    .map(|(_, bytes)| decode(&bytes))
                    .collect::<CoreResult<Vec<StoredRecord>>>()?
                    .into_iter()
                    .filter_map(|record| match record {
                        StoredRecord::Chunk {
                            parent,
                            index,
                            data,
                        } if parent == *id => Some((index, data)),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                attach_pieces(&mut entity, pieces);
                Ok(Some(entity))
            }
            StoredRecord::Chunk { .. } => Ok(None),
        }
    }

    /// Returns every entity in key order. Chunk records are never returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored record cannot be decoded.
    pub fn get_all(&self) -> CoreResult<Vec<Entity>> {
        self.get_all_from(&self.db.snapshot())
    }

    /// Like [`LocalStore::get_all`], reading through `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored record cannot be decoded.
    pub fn get_all_from<R: TableRead>(&self, reader: &R) -> CoreResult<Vec<Entity>> {
        let mut entities = Vec::new();
        let mut chunks: BTreeMap<EntityKey, Vec<(u32, Vec<u8>)>> = BTreeMap::new();

        for (_, bytes) in reader.scan(&self.table) {
            match decode(&bytes)? {
                StoredRecord::Entity(entity) => entities.push(entity),
                StoredRecord::Chunk {
                    parent,
                    index,
                    data,
                } => chunks.entry(parent).or_default().push((index, data)),
            }
        }

        for entity in &mut entities {
            if let Some(pieces) = chunks.remove(&entity.id) {
                attach_pieces(entity, pieces);
            }
        }
        Ok(entities)
    }

    /// Returns every entity carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored record cannot be decoded.
    pub fn get_by_tag(&self, tag: &str) -> CoreResult<Vec<Entity>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|e| e.has_tag(tag))
            .collect())
    }

    /// Returns the number of entities in the table.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored record cannot be decoded.
    pub fn count(&self) -> CoreResult<usize> {
        let snapshot = self.db.snapshot();
        let mut count = 0;
        for (_, bytes) in snapshot.scan(&self.table) {
            if matches!(decode(&bytes)?, StoredRecord::Entity(_)) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Inserts or replaces an entity and returns it as stored.
    ///
    /// An entity without an identifier is given one first: a temporary
    /// (negative) identifier, or the next positive one for auto-increment
    /// tables. Query tags already stored for the record are kept.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for string identifiers shaped like
    /// chunk keys, or any storage error. Nothing is written on error.
    pub fn put(&self, entity: Entity) -> CoreResult<Entity> {
        self.db.transaction(|txn| self.put_in_txn(txn, entity, None))
    }

    /// Like [`LocalStore::put`], additionally tagging the record with `tag`.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::put`].
    pub fn put_tagged(&self, entity: Entity, tag: &str) -> CoreResult<Entity> {
        self.db
            .transaction(|txn| self.put_in_txn(txn, entity, Some(tag)))
    }

    /// Inserts or replaces an entity inside `txn`.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::put`].
    pub fn put_in_txn(
        &self,
        txn: &mut Transaction<'_>,
        mut entity: Entity,
        tag: Option<&str>,
    ) -> CoreResult<Entity> {
        entity.resolved.clear();

        if entity.id.is_unset() {
            entity.id = self.allocate_id(txn)?;
            debug!(table = %self.table, key = %entity.id, "allocated identifier");
        } else if parse_chunk_key(&entity.id).is_some() {
            return Err(CoreError::invalid_key(
                &entity.id,
                "identifier collides with the chunk key format",
            ));
        }

        if let Some(existing) = self.get_from(&*txn, &entity.id)? {
            let mut tags = existing.query_tags;
            for t in entity.query_tags.drain(..) {
                if !tags.contains(&t) {
                    tags.push(t);
                }
            }
            entity.query_tags = tags;
        }
        if let Some(tag) = tag {
            entity.add_tag(tag);
        }

        self.write_record(txn, &entity)?;
        Ok(entity)
    }

    /// Writes an entity under its current key without identifier checks.
    pub(crate) fn write_record(&self, txn: &mut Transaction<'_>, entity: &Entity) -> CoreResult<()> {
        self.delete_chunks(txn, &entity.id)?;

        let mut stored = Entity {
            payload: None,
            resolved: BTreeMap::new(),
            ..entity.clone()
        };

        match entity.payload.as_deref() {
            Some(payload) if payload.len() >= self.chunk_size => {
                let pieces = split_payload(payload, self.chunk_size);
                for (index, piece) in pieces.iter().enumerate().skip(1) {
                    let index = index as u32;
                    let key = chunk_key(&entity.id, index);
                    if let Some(bytes) = txn.get(&self.table, &key) {
                        if let StoredRecord::Chunk { parent, .. } = decode(&bytes)? {
                            if parent != entity.id {
                                return Err(CoreError::invalid_key(
                                    &entity.id,
                                    format!("chunk key {key} is owned by {parent:?}"),
                                ));
                            }
                        }
                    }
                    let chunk = StoredRecord::Chunk {
                        parent: entity.id.clone(),
                        index,
                        data: piece.to_vec(),
                    };
                    txn.put(&self.table, key, encode(&chunk)?);
                }
                stored.payload = pieces.first().map(|p| p.to_vec());
                debug!(
                    table = %self.table,
                    key = %entity.id,
                    chunks = pieces.len(),
                    "stored chunked payload"
                );
            }
            other => stored.payload = other.map(<[u8]>::to_vec),
        }

        txn.put(
            &self.table,
            entity.id.clone(),
            encode(&StoredRecord::Entity(stored))?,
        );
        Ok(())
    }

    /// Removes an entity and its chunk records. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn delete(&self, id: &EntityKey) -> CoreResult<bool> {
        self.db.transaction(|txn| self.delete_in_txn(txn, id))
    }

    /// Like [`LocalStore::delete`], inside `txn`.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn delete_in_txn(&self, txn: &mut Transaction<'_>, id: &EntityKey) -> CoreResult<bool> {
        let existed = txn.get(&self.table, id).is_some();
        txn.delete(&self.table, id);
        self.delete_chunks(txn, id)?;
        Ok(existed)
    }

    /// Atomically replaces the table contents with `entities`.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::put`].
    pub fn replace_all(&self, entities: Vec<Entity>) -> CoreResult<Vec<Entity>> {
        self.db
            .transaction(|txn| self.replace_all_in_txn(txn, entities))
    }

    /// Like [`LocalStore::replace_all`], inside `txn`.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::put`].
    pub fn replace_all_in_txn(
        &self,
        txn: &mut Transaction<'_>,
        entities: Vec<Entity>,
    ) -> CoreResult<Vec<Entity>> {
        txn.clear(&self.table);
        entities
            .into_iter()
            .map(|entity| self.put_in_txn(txn, entity, None))
            .collect()
    }

    /// Removes every entity.
    ///
    /// # Errors
    ///
    /// Returns any storage error.
    pub fn clear(&self) -> CoreResult<()> {
        self.db.transaction(|txn| {
            self.clear_in_txn(txn);
            Ok(())
        })
    }

    /// Like [`LocalStore::clear`], inside `txn`.
    pub fn clear_in_txn(&self, txn: &mut Transaction<'_>) {
        txn.clear(&self.table);
    }

    /// Deletes the chunk records owned by `id`.
    ///
    /// `Int(7)` and `Text("7")` render to the same chunk prefix, so the
    /// owner is read back from each candidate record.
    fn delete_chunks(&self, txn: &mut Transaction<'_>, id: &EntityKey) -> CoreResult<()> {
        let mut keys = Vec::new();
        for (key, bytes) in txn.scan_prefix(&self.table, &chunk_prefix(id)) {
            if parse_chunk_key(&key).is_none() {
                continue;
            }
            if let StoredRecord::Chunk { parent, .. } = decode(&bytes)? {
                if parent == *id {
                    keys.push(key);
                }
            }
        }
        for key in &keys {
            txn.delete(&self.table, key);
        }
        Ok(())
    }

    fn allocate_id(&self, txn: &mut Transaction<'_>) -> CoreResult<EntityKey> {
        let keys = txn.keys(&self.table);

        if self.auto_increment {
            let max = keys
                .iter()
                .filter_map(EntityKey::as_int)
                .filter(|n| *n > 0)
                .max()
                .unwrap_or(0);
            return Ok(EntityKey::Int(max + 1));
        }

        // The low-water mark keeps identifiers decreasing after deletes.
        let counter = format!("tempid:{}", self.table);
        let mut floor = keys.iter().filter_map(EntityKey::as_int).min();
        if let Some(low) = read_counter(txn, &counter)? {
            floor = Some(floor.map_or(low, |f| f.min(low)));
        }

        let next = match floor {
            Some(f) => f
                .checked_sub(1)
                .ok_or_else(|| CoreError::aborted("temporary identifier space exhausted"))?
                .min(-2),
            None => -2,
        };
        write_counter(txn, &counter, next);
        Ok(EntityKey::Int(next))
    }
}

fn attach_pieces(entity: &mut Entity, mut pieces: Vec<(u32, Vec<u8>)>) {
    if pieces.is_empty() {
        return;
    }
    pieces.push((0, entity.payload.take().unwrap_or_default()));
    entity.payload = Some(reassemble(pieces));
}
