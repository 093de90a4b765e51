//! Cache freshness tracking.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// How long data fetched from the remote stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Refresh on every read.
    Always,
    /// Refresh once the last refresh is older than this.
    MaxAge(Duration),
}

impl CachePolicy {
    /// Builds a policy from a duration in milliseconds, where `-1` means
    /// [`CachePolicy::Always`].
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            CachePolicy::Always
        } else {
            CachePolicy::MaxAge(Duration::from_millis(millis as u64))
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::MaxAge(Duration::from_secs(300))
    }
}

/// Decides whether cached data must be refreshed.
///
/// Refresh is required when the policy is [`CachePolicy::Always`], when no
/// refresh was ever recorded, or when `now` is past `last + max_age`.
#[must_use]
pub fn needs_refresh(policy: CachePolicy, last: Option<u64>, now: u64) -> bool {
    match (policy, last) {
        (CachePolicy::Always, _) | (_, None) => true,
        (CachePolicy::MaxAge(max_age), Some(last)) => {
            now > last.saturating_add(max_age.as_millis() as u64)
        }
    }
}

/// Storage for last-refresh timestamps.
pub trait FreshnessStore: Send + Sync {
    /// Returns when `key` was last refreshed (ms since epoch).
    fn get(&self, key: &str) -> Option<u64>;

    /// Records a refresh of `key`.
    fn set(&self, key: &str, millis: u64);

    /// Forgets every refresh.
    fn clear(&self);
}

/// In-memory freshness records that live as long as the session.
#[derive(Debug, Default)]
pub struct SessionFreshness {
    records: RwLock<HashMap<String, u64>>,
}

impl SessionFreshness {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FreshnessStore for SessionFreshness {
    fn get(&self, key: &str) -> Option<u64> {
        self.records.read().get(key).copied()
    }

    fn set(&self, key: &str, millis: u64) {
        self.records.write().insert(key.to_string(), millis);
    }

    fn clear(&self) {
        self.records.write().clear();
    }
}
