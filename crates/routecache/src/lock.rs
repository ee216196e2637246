//! Per-key asynchronous locks for single-flight recomputation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of on-demand async mutexes, one per distinct key string.
///
/// Locks are created on first use and kept for the lifetime of the registry.
/// Removing them would race lock creation against disposal, so the table
/// grows with the number of distinct keys ever recomputed.
#[derive(Debug, Default)]
pub struct KeyLockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held lock for one key. Released on drop.
pub type KeyLockGuard = OwnedMutexGuard<()>;

impl KeyLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the lock for `key` is free and take it.
    pub async fn acquire(&self, key: &str) -> KeyLockGuard {
        let lock = match self.locks.get(key) {
            Some(existing) => Arc::clone(existing.value()),
            None => Arc::clone(
                self.locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .value(),
            ),
        };
        // The map shard guard is gone before we await.
        lock.lock_owned().await
    }

    /// Number of distinct keys that ever took a lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
