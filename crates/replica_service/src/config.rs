//! Configuration for data services.

use crate::freshness::CachePolicy;

/// Configuration for one [`DataService`](crate::DataService).
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// How long remote data stays fresh.
    pub cache_policy: CachePolicy,
    /// Probe the remote before refreshing and before writing.
    pub check_connectivity: bool,
    /// Skip due refreshes when the remote reports no upstream change.
    pub use_last_modified: bool,
    /// Human-readable entity type name used in sync messages.
    pub label: Option<String>,
}

impl ServiceConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Sets whether to probe connectivity first.
    #[must_use]
    pub fn with_check_connectivity(mut self, value: bool) -> Self {
        self.check_connectivity = value;
        self
    }

    /// Sets whether to consult the remote's last-modified marker.
    #[must_use]
    pub fn with_last_modified(mut self, value: bool) -> Self {
        self.use_last_modified = value;
        self
    }

    /// Sets the display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
