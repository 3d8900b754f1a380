//! Per-entity lock registry.
//!
//! Every mutating RPC runs under its entity's lock so concurrent calls
//! against the same entity serialize on the agent. Acquisition is
//! bounded; a timeout surfaces as the distinct `locked` resultcode
//! rather than queueing callers indefinitely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Named entity locks. One mutex per entity, created on first use and
/// kept for the agent's lifetime.
#[derive(Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the named entity's lock, waiting at most `wait`. Returns
    /// `None` when the lock stayed busy for the whole window.
    pub async fn acquire(&self, entity: &str, wait: Duration) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self.locks.lock().await;
            Arc::clone(map.entry(entity.to_string()).or_default())
        };
        tokio::time::timeout(wait, lock.lock_owned()).await.ok()
    }
}
