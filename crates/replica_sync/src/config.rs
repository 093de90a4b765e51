//! Configuration for the sync engine.

/// Configuration for sync runs.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Failed attempts after which a retained operation is abandoned.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl SyncConfig {
    /// Creates a configuration that retries failed operations forever.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandons an operation once it has failed `attempts` times.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Returns true if an operation that has failed `attempts` times should
    /// be dropped.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_by_default() {
        let config = SyncConfig::default();
        assert!(config.max_attempts.is_none());
        assert!(!config.exhausted(u32::MAX));
    }

    #[test]
    fn bounded_attempts() {
        let config = SyncConfig::new().with_max_attempts(3);
        assert!(!config.exhausted(2));
        assert!(config.exhausted(3));
        assert!(config.exhausted(4));
    }

    #[test]
    fn zero_attempts_means_one() {
        let config = SyncConfig::new().with_max_attempts(0);
        assert_eq!(config.max_attempts, Some(1));
    }
}
