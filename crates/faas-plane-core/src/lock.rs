//! Per-function mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::function::FunctionKey;

/// Sharded map of per-key async mutexes.
///
/// Start, stop, cold start and delete for one function are serialized
/// while different functions proceed independently. An entry is only
/// pruned once no task holds or waits on it, so a delete racing a
/// re-register still shares one mutex.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<FunctionKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &FunctionKey) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is released before awaiting.
        let lock = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        lock.lock_owned().await
    }

    /// Drop the entry for `key` if nobody holds or waits on it.
    pub fn prune(&self, key: &FunctionKey) -> bool {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
