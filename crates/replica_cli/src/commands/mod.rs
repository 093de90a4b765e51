//! CLI command implementations.

pub mod checkpoint;
pub mod inspect;
pub mod queue;
pub mod verify;

use replica_core::{Database, StoreConfig};
use std::path::Path;

/// Opens an existing database without creating anything.
pub fn open_existing(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    let config = StoreConfig::new().create_if_missing(false);
    Ok(Database::open_with_config(path, config)?)
}
