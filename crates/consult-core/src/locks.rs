//! Per-key async mutual exclusion
//!
//! Provider ids serialize booking creation; booking ids serialize call
//! creation, joins and leaves. Entries are created on demand and pruned once
//! nobody holds or waits on them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    name: &'static str,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        // The map shard guard is released before awaiting the mutex.
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        trace!("{} lock requested for {}", self.name, key);
        mutex.lock_owned().await
    }

    /// Drop entries that nobody holds or waits on
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }
}
