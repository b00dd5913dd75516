//! Keyed write locks
//!
//! The account JWT lists every scoped signing key, so any change that
//! re-signs an account (or one of its users) reads and writes under the
//! account id's lock. Cluster edits and health writes share the cluster
//! id's lock. Locks are process-local.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct WriteLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl WriteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        // The map shard is released before awaiting
        let lock = self
            .locks
            .entry(id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted entity
    pub fn forget(&self, id: &str) {
        self.locks.remove(id);
    }
}
