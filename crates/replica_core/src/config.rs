//! Local store configuration.

use crate::chunk::DEFAULT_CHUNK_SIZE;

/// Configuration for opening a local database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Payloads at least this long are split into chunk records.
    pub chunk_size: usize,

    /// Whether to sync the record log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Commits after which the log is compacted into a snapshot (0 = never).
    pub checkpoint_after: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sync_on_commit: true,
            checkpoint_after: 1024,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the payload chunk size.
    #[must_use]
    pub const fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub const fn checkpoint_after(mut self, commits: u64) -> Self {
        self.checkpoint_after = commits;
        self
    }
}
