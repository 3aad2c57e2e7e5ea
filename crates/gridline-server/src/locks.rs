//! Per-row commit serialization.
//!
//! A PATCH holds its row's lock from the store commit through the publish,
//! so two commits to the same row reach the relay in commit order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gridline_core::RowId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map of lazily created async locks, one per row being written.
#[derive(Debug, Default)]
pub struct RowLocks {
    locks: Mutex<HashMap<RowId, Arc<AsyncMutex<()>>>>,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a row.
    pub async fn lock(&self, row_id: RowId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Entries only referenced by the map are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(row_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of rows currently locked or awaited.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| {
                locks
                    .values()
                    .filter(|lock| Arc::strong_count(lock) > 1)
                    .count()
            })
            .unwrap_or(0)
    }
}
