//! Inspect command implementation.

use super::open_existing;
use replica_core::TransactionLog;
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Record log size in bytes.
    pub log_size: u64,
    /// Sequence number of the last commit.
    pub sequence: u64,
    /// Commits since the last checkpoint.
    pub commits_since_checkpoint: u64,
    /// Number of pending operations.
    pub pending_operations: usize,
    /// Per-table statistics.
    pub tables: Vec<TableStats>,
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Number of stored records, chunks included.
    pub records: usize,
    /// Whether the table is used internally.
    pub internal: bool,
}

/// Collects the inspection result for the database at `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let db = std::sync::Arc::new(open_existing(path)?);
    let stats = db.stats()?;
    let pending_operations = TransactionLog::new(db.clone()).len();

    let tables = stats
        .tables
        .into_iter()
        .map(|(name, records)| TableStats {
            internal: name.starts_with("__"),
            name,
            records,
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        log_size: stats.log_size,
        sequence: stats.sequence,
        commits_since_checkpoint: stats.commits_since_checkpoint,
        pending_operations,
        tables,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, show_internal: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut result = inspect(path)?;
    if !show_internal {
        result.tables.retain(|t| !t.internal);
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Replica Database: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Log size:            {} bytes", result.log_size);
    println!("  Last commit:         {}", result.sequence);
    println!("  Since checkpoint:    {} commits", result.commits_since_checkpoint);
    println!();
    println!("Pending operations:    {}", result.pending_operations);
    println!();

    if result.tables.is_empty() {
        println!("No tables.");
        return;
    }

    println!("Tables:");
    println!("  {:<32} {:>10}", "Name", "Records");
    println!("  {:-<32} {:->10}", "", "");
    for table in &result.tables {
        println!("  {:<32} {:>10}", table.name, table.records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{Database, Entity, LocalStore, OperationKind, QUEUE_TABLE};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn inspect_counts_tables_and_queue() {
        let dir = tempdir().unwrap();
        {
            let db = Arc::new(Database::open(dir.path()).unwrap());
            let store = LocalStore::new(db.clone(), "note");
            let stored = store.put(Entity::new("a")).unwrap();
            TransactionLog::new(db)
                .enqueue("note", OperationKind::AddOrUpdate, stored)
                .unwrap();
        }

        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.pending_operations, 1);
        assert!(result.log_size > 0);

        let note = result.tables.iter().find(|t| t.name == "note").unwrap();
        assert_eq!(note.records, 1);
        assert!(!note.internal);
        assert!(result
            .tables
            .iter()
            .any(|t| t.name == QUEUE_TABLE && t.internal));
    }

    #[test]
    fn missing_database_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent")).is_err());
    }
}
