//! Persistent counters kept alongside the user tables.

use crate::database::{TableRead, Transaction};
use crate::error::{CoreError, CoreResult};
use crate::key::EntityKey;

/// Internal table holding counters.
pub(crate) const META_TABLE: &str = "__meta";

/// Reads a counter in the current transaction.
pub(crate) fn read_counter(txn: &Transaction<'_>, name: &str) -> CoreResult<Option<i64>> {
    match txn.get(META_TABLE, &EntityKey::from(name)) {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| CoreError::corrupted(format!("counter {name} is not 8 bytes")))?;
            Ok(Some(i64::from_le_bytes(raw)))
        }
        None => Ok(None),
    }
}

/// Writes a counter in the current transaction.
pub(crate) fn write_counter(txn: &mut Transaction<'_>, name: &str, value: i64) {
    txn.put(META_TABLE, EntityKey::from(name), value.to_le_bytes().to_vec());
}
