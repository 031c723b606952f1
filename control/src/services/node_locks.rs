use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-node async locks serializing edits, token resets and pushes.
///
/// Held across the database write and the daemon push that follows it, so
/// the daemon always ends up with the last committed state.
#[derive(Default)]
pub struct NodeLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, node_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(node_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted node.
    pub fn forget(&self, node_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(&node_id);
    }
}
