//! Per-key mutual exclusion
//!
//! A small registry of async mutexes keyed by string, used to serialize
//! cache refills per filename and agent updates per id. Holders of a key's
//! guard are the only in-flight operation for that key; concurrent callers
//! queue on the same mutex rather than racing.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-key async locks.
///
/// Keys are never evicted; the population is bounded by the caller's key
/// space (the file allow-list, the set of live agent ids).
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, waiting behind any current holder.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}
