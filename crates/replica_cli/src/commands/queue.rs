//! Queue command implementation.

use super::open_existing;
use replica_core::{PendingOperation, TransactionLog};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// A pending operation as printed.
#[derive(Debug, Serialize)]
pub struct QueueEntry {
    /// Position in the queue.
    pub sequence: u64,
    /// Unique identifier of the entry.
    pub operation_id: String,
    /// Entity type.
    pub entity_type: String,
    /// `save` or `delete`.
    pub kind: &'static str,
    /// Identifier of the targeted entity.
    pub entity_id: String,
    /// Entity title.
    pub title: String,
    /// Entity version, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Payload length in bytes.
    pub payload_len: usize,
    /// When the entry was queued (ms since epoch).
    pub queued_at: u64,
    /// Failed replay attempts.
    pub attempts: u32,
}

impl From<&PendingOperation> for QueueEntry {
    fn from(op: &PendingOperation) -> Self {
        Self {
            sequence: op.sequence,
            operation_id: op.operation_id.to_string(),
            entity_type: op.entity_type.clone(),
            kind: op.kind.label(),
            entity_id: op.snapshot.id.to_string(),
            title: op.snapshot.title.clone(),
            version: op.snapshot.version,
            payload_len: op.snapshot.payload.as_ref().map_or(0, Vec::len),
            queued_at: op.queued_at,
            attempts: op.attempts,
        }
    }
}

/// Reads the queued operations, optionally filtered by entity type.
pub fn entries(
    path: &Path,
    entity_type: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<QueueEntry>, Box<dyn std::error::Error>> {
    let db = Arc::new(open_existing(path)?);
    let ops = TransactionLog::new(db).all()?;

    Ok(ops
        .iter()
        .filter(|op| entity_type.map_or(true, |t| op.entity_type == t))
        .take(limit.unwrap_or(usize::MAX))
        .map(QueueEntry::from)
        .collect())
}

/// Runs the queue command.
pub fn run(
    path: &Path,
    entity_type: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = entries(path, entity_type, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            if entries.is_empty() {
                println!("No pending operations.");
                return Ok(());
            }
            println!(
                "{:>6}  {:<16} {:<6} {:>12}  {:>8}  TITLE",
                "SEQ", "TYPE", "KIND", "ID", "ATTEMPTS"
            );
            for e in &entries {
                println!(
                    "{:>6}  {:<16} {:<6} {:>12}  {:>8}  {}",
                    e.sequence, e.entity_type, e.kind, e.entity_id, e.attempts, e.title
                );
            }
            println!();
            println!("{} pending operation(s)", entries.len());
        }
    }

    Ok(())
}
