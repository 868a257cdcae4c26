//! Per-entity mutual-exclusion discipline.
//!
//! The durable backend has no row locks of its own here; instead every
//! mutating operation serializes through one async mutex per entity key.
//! Unrelated entities never contend.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry handing out one async mutex per entity key.
pub struct LockRegistry<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> LockRegistry<K>
where
    K: Eq + Hash + Clone,
{
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the exclusive lock for `key`, creating it on first use.
    ///
    /// The guard is owned, so it can be held across await points for the
    /// whole read-validate-write-settle critical section.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

impl<K> Default for LockRegistry<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
