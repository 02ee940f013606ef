//! Per-session operation locks
//!
//! Operations on one session (transforms, undo/redo, save, delete) run one at
//! a time; different sessions never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one session
    pub async fn lock(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(session_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted session if nobody is waiting on it
    pub async fn forget(&self, session_id: Uuid) {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(&session_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&session_id);
            }
        }
    }

    /// Number of sessions with a lock entry
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
