//! Per-key async locks
//!
//! Serializes units of work that share a key (a document) while letting
//! work on different keys run in parallel. Guards are owned, so they can be
//! carried out of the future that acquired them.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily created async mutexes, one per key
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Creates an empty lock map
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Waits for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        // The shard guard must be released before awaiting.
        let mutex = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        mutex.lock_owned().await
    }

    /// Returns true if some task currently holds the lock for `key`
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks
            .get(key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Drops mutexes nobody holds or waits for
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    /// Number of keys with an allocated mutex
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
