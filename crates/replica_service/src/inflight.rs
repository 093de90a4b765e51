//! Coalescing of identical concurrent reads.

use crate::error::ServiceResult;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use replica_core::Entity;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type SharedFetch = Shared<BoxFuture<'static, ServiceResult<Vec<Entity>>>>;

/// Pending reads keyed by `(entity_type, request_key)`.
///
/// The first caller for a key starts the read; callers arriving while it is
/// in progress await the same result. The entry is removed as soon as the
/// read settles, before any waiter sees the result, so the next caller after
/// that starts a fresh read.
///
/// Dropping one waiter does not cancel the read for the others.
#[derive(Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<(String, String), SharedFetch>>,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the read produced by `start`, or joins the one already running
    /// for the same key.
    ///
    /// # Errors
    ///
    /// Returns the read's error, shared with every waiter.
    pub async fn run<F>(
        self: &Arc<Self>,
        entity_type: &str,
        request_key: &str,
        start: F,
    ) -> ServiceResult<Vec<Entity>>
    where
        F: FnOnce() -> BoxFuture<'static, ServiceResult<Vec<Entity>>>,
    {
        let key = (entity_type.to_string(), request_key.to_string());

        let shared = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(existing) => {
                    debug!(entity_type, request_key, "joining in-flight request");
                    existing.clone()
                }
                None => {
                    let registry = Arc::clone(self);
                    let owned_key = key.clone();
                    let read = start();
                    let fetch = async move {
                        let result = read.await;
                        registry.entries.lock().remove(&owned_key);
                        result
                    }
                    .boxed()
                    .shared();
                    entries.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        shared.await
    }

    /// Returns true if a read for the key is in progress.
    #[must_use]
    pub fn contains(&self, entity_type: &str, request_key: &str) -> bool {
        self.entries
            .lock()
            .contains_key(&(entity_type.to_string(), request_key.to_string()))
    }

    /// Returns the number of reads in progress.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no read is in progress.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
