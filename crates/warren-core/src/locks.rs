//! Per-resource execution locks.
//!
//! One FIFO `tokio::sync::Mutex` per resource id, created on first use and
//! dropped from the table when its last holder or waiter lets go. Operations
//! on different ids never contend.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Default, Clone)]
pub struct ResourceLocks {
    table: LockTable,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Waiters are served in arrival order.
    pub async fn acquire(&self, key: &str) -> ResourceGuard {
        let handle = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                table
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = Arc::clone(&handle).lock_owned().await;
        ResourceGuard {
            key: key.to_string(),
            handle,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of ids with a live lock entry.
    pub fn active(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one resource id, released on drop.
pub struct ResourceGuard {
    key: String,
    handle: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl ResourceGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard").field("key", &self.key).finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // table entry + our handle: nobody else is holding or waiting
        if Arc::strong_count(&self.handle) == 2 {
            table.remove(&self.key);
        }
    }
}
