//! Persisted record formats.
//!
//! Two layers are encoded with CBOR:
//! - [`LogEntry`] - one record in the log: a committed transaction or a
//!   checkpoint snapshot of every table
//! - [`StoredRecord`] - the value kept under a key in an entity table

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::key::EntityKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single change to one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum TableWrite {
    /// Insert or replace a value.
    Put {
        table: String,
        key: EntityKey,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete { table: String, key: EntityKey },
    /// Remove every key of a table.
    Clear { table: String },
}

/// A snapshot row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SnapshotRow {
    pub key: EntityKey,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

/// One record of the database log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogEntry {
    /// A committed transaction.
    Commit {
        sequence: u64,
        writes: Vec<TableWrite>,
    },
    /// Full contents of every table as of `sequence`.
    Snapshot {
        sequence: u64,
        tables: BTreeMap<String, Vec<SnapshotRow>>,
    },
}

impl LogEntry {
    pub(crate) fn sequence(&self) -> u64 {
        match self {
            LogEntry::Commit { sequence, .. } | LogEntry::Snapshot { sequence, .. } => *sequence,
        }
    }
}

/// Value stored under a key in an entity table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum StoredRecord {
    /// The entity itself; its payload holds chunk 0.
    Entity(Entity),
    /// Piece `index` (>= 1) of `parent`'s payload.
    Chunk {
        parent: EntityKey,
        index: u32,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

pub(crate) fn encode<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_entry_round_trip() {
        let entry = LogEntry::Commit {
            sequence: 9,
            writes: vec![
                TableWrite::Put {
                    table: "notes".into(),
                    key: EntityKey::Int(-2),
                    value: vec![1, 2, 3],
                },
                TableWrite::Delete {
                    table: "notes".into(),
                    key: EntityKey::from("x"),
                },
                TableWrite::Clear {
                    table: "tags".into(),
                },
            ],
        };

        let decoded: LogEntry = decode(&encode(&entry).unwrap()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.sequence(), 9);
    }

    #[test]
    fn decode_garbage_is_codec_error() {
        let result: CoreResult<LogEntry> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CoreError::Codec { .. })));
    }
}
