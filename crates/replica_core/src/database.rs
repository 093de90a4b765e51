//! Database facade, transactions and recovery.

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::key::EntityKey;
use crate::record::{decode, encode, LogEntry, SnapshotRow, TableWrite};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use replica_storage::{FileLog, MemoryLog, RecordLog};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// File name of the record log inside a database directory.
pub const LOG_FILE: &str = "replica.log";

type Table = BTreeMap<EntityKey, Vec<u8>>;

/// Read access to table contents.
///
/// Implemented by [`ReadSnapshot`] (committed state) and [`Transaction`]
/// (committed state overlaid with the transaction's own writes).
pub trait TableRead {
    /// Returns the value stored under `key`.
    fn get(&self, table: &str, key: &EntityKey) -> Option<Vec<u8>>;

    /// Returns every row of `table` in key order.
    fn scan(&self, table: &str) -> Vec<(EntityKey, Vec<u8>)>;

    /// Returns the rows whose string key starts with `prefix`, in key order.
    fn scan_prefix(&self, table: &str, prefix: &str) -> Vec<(EntityKey, Vec<u8>)>;

    /// Returns every key of `table` in order.
    fn keys(&self, table: &str) -> Vec<EntityKey> {
        self.scan(table).into_iter().map(|(key, _)| key).collect()
    }
}

fn prefix_range<'a>(
    table: &'a Table,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a EntityKey, &'a Vec<u8>)> + 'a {
    table
        .range(EntityKey::Text(prefix.to_string())..)
        .take_while(move |(key, _)| matches!(key, EntityKey::Text(s) if s.starts_with(prefix)))
}

/// A consistent view of the committed tables.
pub struct ReadSnapshot<'a> {
    tables: RwLockReadGuard<'a, BTreeMap<String, Table>>,
}

impl TableRead for ReadSnapshot<'_> {
    fn get(&self, table: &str, key: &EntityKey) -> Option<Vec<u8>> {
        self.tables.get(table).and_then(|t| t.get(key).cloned())
    }

    fn scan(&self, table: &str) -> Vec<(EntityKey, Vec<u8>)> {
        self.tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn scan_prefix(&self, table: &str, prefix: &str) -> Vec<(EntityKey, Vec<u8>)> {
        self.tables
            .get(table)
            .map(|t| {
                prefix_range(t, prefix)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn keys(&self, table: &str) -> Vec<EntityKey> {
        self.tables
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Overlay {
    cleared: bool,
    entries: BTreeMap<EntityKey, Option<Vec<u8>>>,
}

/// A write transaction.
///
/// Writes are buffered and only applied when the closure passed to
/// [`Database::transaction`] returns `Ok`. Reads through the transaction see
/// its own buffered writes.
pub struct Transaction<'db> {
    db: &'db Database,
    writes: Vec<TableWrite>,
    overlay: BTreeMap<String, Overlay>,
}

impl<'db> Transaction<'db> {
    fn new(db: &'db Database) -> Self {
        Self {
            db,
            writes: Vec::new(),
            overlay: BTreeMap::new(),
        }
    }

    /// Inserts or replaces a value.
    pub fn put(&mut self, table: &str, key: EntityKey, value: Vec<u8>) {
        self.overlay
            .entry(table.to_string())
            .or_default()
            .entries
            .insert(key.clone(), Some(value.clone()));
        self.writes.push(TableWrite::Put {
            table: table.to_string(),
            key,
            value,
        });
    }

    /// Removes a key.
    pub fn delete(&mut self, table: &str, key: &EntityKey) {
        self.overlay
            .entry(table.to_string())
            .or_default()
            .entries
            .insert(key.clone(), None);
        self.writes.push(TableWrite::Delete {
            table: table.to_string(),
            key: key.clone(),
        });
    }

    /// Removes every key of a table.
    pub fn clear(&mut self, table: &str) {
        let overlay = self.overlay.entry(table.to_string()).or_default();
        overlay.cleared = true;
        overlay.entries.clear();
        self.writes.push(TableWrite::Clear {
            table: table.to_string(),
        });
    }

    /// Returns the number of buffered writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    fn merged(&self, table: &str, committed: Vec<(EntityKey, Vec<u8>)>) -> Vec<(EntityKey, Vec<u8>)> {
        let Some(overlay) = self.overlay.get(table) else {
            return committed;
        };

        let mut rows: BTreeMap<EntityKey, Vec<u8>> = if overlay.cleared {
            BTreeMap::new()
        } else {
            committed.into_iter().collect()
        };
        for (key, value) in &overlay.entries {
            match value {
                Some(v) => {
                    rows.insert(key.clone(), v.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        rows.into_iter().collect()
    }
}

impl TableRead for Transaction<'_> {
    fn get(&self, table: &str, key: &EntityKey) -> Option<Vec<u8>> {
        if let Some(overlay) = self.overlay.get(table) {
            if let Some(value) = overlay.entries.get(key) {
                return value.clone();
            }
            if overlay.cleared {
                return None;
            }
        }
        self.db
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key).cloned())
    }

    fn scan(&self, table: &str) -> Vec<(EntityKey, Vec<u8>)> {
        let committed = self.db.snapshot().scan(table);
        self.merged(table, committed)
    }

    fn scan_prefix(&self, table: &str, prefix: &str) -> Vec<(EntityKey, Vec<u8>)> {
        let committed = self.db.snapshot().scan_prefix(table, prefix);
        self.merged(table, committed)
            .into_iter()
            .filter(|(key, _)| matches!(key, EntityKey::Text(s) if s.starts_with(prefix)))
            .collect()
    }
}

/// Statistics about a database.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    /// Sequence number of the last commit.
    pub sequence: u64,
    /// Size of the record log in bytes.
    pub log_size: u64,
    /// Commits appended since the last checkpoint.
    pub commits_since_checkpoint: u64,
    /// Row count per table (internal tables included).
    pub tables: BTreeMap<String, usize>,
}

/// The local database handle.
///
/// `Database` keeps every table in memory and makes each committed
/// transaction durable as a single record in a [`RecordLog`]. Opening a
/// database replays the log; [`Database::checkpoint`] compacts it into one
/// snapshot record.
///
/// # Concurrency
///
/// There is a single writer: [`Database::transaction`] holds an exclusive
/// lock for the duration of its closure, so read-modify-write sequences
/// (such as temporary identifier allocation) cannot interleave. Readers are
/// never blocked by an open transaction, only by the brief apply step of a
/// commit.
///
/// # Example
///
/// ```rust
/// use replica_core::{Database, EntityKey, TableRead};
///
/// let db = Database::open_in_memory().unwrap();
/// db.transaction(|txn| {
///     txn.put("notes", EntityKey::Int(1), vec![1, 2, 3]);
///     Ok(())
/// })
/// .unwrap();
///
/// assert_eq!(db.snapshot().get("notes", &EntityKey::Int(1)), Some(vec![1, 2, 3]));
/// ```
pub struct Database {
    config: StoreConfig,
    path: Option<PathBuf>,
    log: Mutex<Box<dyn RecordLog>>,
    tables: RwLock<BTreeMap<String, Table>>,
    write_lock: Mutex<()>,
    sequence: AtomicU64,
    commits_since_checkpoint: AtomicU64,
}

impl Database {
    /// Opens a database directory with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, another process
    /// holds the database, or the log cannot be replayed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a database directory with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseNotFound`] if the directory is missing
    /// and `create_if_missing` is false, plus the errors of [`Database::open`].
    pub fn open_with_config(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        if !path.exists() {
            if !config.create_if_missing {
                return Err(CoreError::DatabaseNotFound {
                    path: path.display().to_string(),
                });
            }
            fs::create_dir_all(path)?;
        }

        let log = FileLog::open(&path.join(LOG_FILE))?;
        let mut db = Self::open_with_log(Box::new(log), config)?;
        db.path = Some(path.to_path_buf());
        Ok(db)
    }

    /// Opens an empty in-memory database.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(StoreConfig::default())
    }

    /// Opens an empty in-memory database with a custom configuration.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn open_in_memory_with_config(config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_log(Box::new(MemoryLog::new()), config)
    }

    /// Opens a database over an arbitrary record log, replaying its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or holds an entry that
    /// cannot be decoded.
    pub fn open_with_log(log: Box<dyn RecordLog>, config: StoreConfig) -> CoreResult<Self> {
        let (tables, sequence, commits) = Self::recover(log.as_ref())?;

        Ok(Self {
            config,
            path: None,
            log: Mutex::new(log),
            tables: RwLock::new(tables),
            write_lock: Mutex::new(()),
            sequence: AtomicU64::new(sequence),
            commits_since_checkpoint: AtomicU64::new(commits),
        })
    }

    fn recover(log: &dyn RecordLog) -> CoreResult<(BTreeMap<String, Table>, u64, u64)> {
        let mut tables: BTreeMap<String, Table> = BTreeMap::new();
        let mut sequence = 0;
        let mut commits = 0;

        for record in log.records()? {
            let entry: LogEntry = decode(&record.payload).map_err(|e| {
                CoreError::corrupted(format!("log record at offset {}: {e}", record.offset))
            })?;
            sequence = entry.sequence();

            match entry {
                LogEntry::Snapshot {
                    tables: snapshot, ..
                } => {
                    tables = snapshot
                        .into_iter()
                        .map(|(name, rows)| {
                            (name, rows.into_iter().map(|r| (r.key, r.value)).collect())
                        })
                        .collect();
                    commits = 0;
                }
                LogEntry::Commit { writes, .. } => {
                    apply_writes(&mut tables, writes);
                    commits += 1;
                }
            }
        }

        info!(sequence, tables = tables.len(), "recovered local database");
        Ok((tables, sequence, commits))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the directory path for file-backed databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the sequence number of the last commit.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns a consistent read view of the committed tables.
    ///
    /// Commits wait while the view is alive, so keep it short-lived.
    #[must_use]
    pub fn snapshot(&self) -> ReadSnapshot<'_> {
        ReadSnapshot {
            tables: self.tables.read(),
        }
    }

    /// Runs `f` against a consistent read view.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn read<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadSnapshot<'_>) -> CoreResult<T>,
    {
        f(&self.snapshot())
    }

    /// Executes a write transaction.
    ///
    /// If `f` returns `Ok`, its writes are appended to the log as one record
    /// and applied. If `f` returns `Err`, or the log append fails, nothing is
    /// applied and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or from the record log.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let _guard = self.write_lock.lock();
        let mut txn = Transaction::new(self);

        let value = match f(&mut txn) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, writes = txn.writes.len(), "transaction aborted");
                return Err(e);
            }
        };

        self.commit_locked(txn)?;
        Ok(value)
    }

    fn commit_locked(&self, txn: Transaction<'_>) -> CoreResult<()> {
        if txn.writes.is_empty() {
            return Ok(());
        }

        let sequence = self.sequence.load(Ordering::SeqCst) + 1;
        let entry = LogEntry::Commit {
            sequence,
            writes: txn.writes,
        };
        let bytes = encode(&entry)?;

        {
            let mut log = self.log.lock();
            let offset = log.append(&bytes)?;
            if self.config.sync_on_commit {
                if let Err(e) = log.sync() {
                    // A failed commit must not come back on the next open.
                    if let Err(undo) = log.truncate(offset) {
                        warn!(error = %undo, offset, "could not drop unsynced commit");
                    }
                    return Err(e.into());
                }
            }
        }

        if let LogEntry::Commit { writes, .. } = entry {
            debug!(sequence, writes = writes.len(), "committed transaction");
            apply_writes(&mut self.tables.write(), writes);
        }
        self.sequence.store(sequence, Ordering::SeqCst);

        let pending = self.commits_since_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
        if self.config.checkpoint_after > 0 && pending >= self.config.checkpoint_after {
            if let Err(e) = self.checkpoint_locked() {
                warn!(error = %e, "automatic checkpoint failed");
            }
        }

        Ok(())
    }

    /// Compacts the log into a single snapshot record.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written. The previous log
    /// stays intact in that case.
    pub fn checkpoint(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> CoreResult<()> {
        let sequence = self.sequence.load(Ordering::SeqCst);
        let tables = self
            .tables
            .read()
            .iter()
            .map(|(name, rows)| {
                let rows = rows
                    .iter()
                    .map(|(key, value)| SnapshotRow {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect();
                (name.clone(), rows)
            })
            .collect();

        let bytes = encode(&LogEntry::Snapshot { sequence, tables })?;
        {
            let mut log = self.log.lock();
            log.rewrite(&[bytes])?;
            log.sync()?;
        }
        self.commits_since_checkpoint.store(0, Ordering::SeqCst);

        info!(sequence, "checkpointed local database");
        Ok(())
    }

    /// Returns the names of all tables that have ever been written.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Returns database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the log size cannot be determined.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        let log_size = self.log.lock().size()?;
        let tables = self
            .tables
            .read()
            .iter()
            .map(|(name, rows)| (name.clone(), rows.len()))
            .collect();

        Ok(DatabaseStats {
            sequence: self.sequence(),
            log_size,
            commits_since_checkpoint: self.commits_since_checkpoint.load(Ordering::SeqCst),
            tables,
        })
    }
}

fn apply_writes(tables: &mut BTreeMap<String, Table>, writes: Vec<TableWrite>) {
    for write in writes {
        match write {
            TableWrite::Put { table, key, value } => {
                tables.entry(table).or_default().insert(key, value);
            }
            TableWrite::Delete { table, key } => {
                if let Some(rows) = tables.get_mut(&table) {
                    rows.remove(&key);
                }
            }
            TableWrite::Clear { table } => {
                tables.entry(table).or_default().clear();
            }
        }
    }
}
