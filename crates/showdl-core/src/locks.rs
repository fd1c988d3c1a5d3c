//! Per-show serialization of group mutations

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per show id
///
/// Start, switch, cancel, remove and completion recording for a show run
/// one at a time; different shows never wait on each other.
#[derive(Debug, Default)]
pub struct ShowLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ShowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a show
    pub async fn lock(&self, show_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(show_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
