//! Checkpoint command implementation.

use super::open_existing;
use std::path::Path;
use tracing::info;

/// Log sizes around a checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointResult {
    /// Log size before, in bytes.
    pub before: u64,
    /// Log size after, in bytes.
    pub after: u64,
}

/// Rewrites the record log of the database at `path` as one snapshot.
pub fn checkpoint(path: &Path) -> Result<CheckpointResult, Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    let before = db.stats()?.log_size;
    db.checkpoint()?;
    let after = db.stats()?.log_size;
    info!(before, after, "checkpoint complete");
    Ok(CheckpointResult { before, after })
}

/// Runs the checkpoint command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let result = checkpoint(path)?;
    println!("Log size before: {} bytes", result.before);
    println!("Log size after:  {} bytes", result.after);
    if result.before > result.after {
        println!("Reclaimed:       {} bytes", result.before - result.after);
    }
    Ok(())
}
