//! Single-flight bookkeeping.
//!
//! [`TargetLocks`] keeps one async mutex per target id so an application or
//! host is never evaluated twice at once. The scheduler uses
//! [`TargetLocks::try_claim`] and skips busy targets; direct checks use
//! [`TargetLocks::claim`] and queue behind the running evaluation.
//!
//! [`RecoveryLocks`] is the same idea for recovery, except a busy
//! application is never waited on: the second attempt is suppressed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::AbortHandle;

#[derive(Debug, Default)]
pub struct TargetLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TargetLocks {
    fn slot(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(id.to_string()).or_default().clone()
    }

    /// Claim the target if nobody holds it.
    pub fn try_claim(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        self.slot(id).try_lock_owned().ok()
    }

    /// Wait until the target is free, then claim it.
    pub async fn claim(&self, id: &str) -> OwnedMutexGuard<()> {
        self.slot(id).lock_owned().await
    }

    /// Drop slots nobody holds or waits on, so ids of deleted targets do
    /// not accumulate. A slot whose only reference is the map is idle:
    /// guards and waiters each hold their own `Arc`.
    pub fn prune(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Applications with a recovery currently running.
#[derive(Debug, Clone, Default)]
pub struct RecoveryLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RecoveryLocks {
    pub fn try_begin(&self, app_id: &str) -> Option<RecoveryGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(app_id.to_string()) {
            return None;
        }
        Some(RecoveryGuard {
            active: self.active.clone(),
            app_id: app_id.to_string(),
        })
    }

    pub fn is_active(&self, app_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(app_id)
    }
}

/// Releases the application's recovery slot when dropped.
#[derive(Debug)]
pub struct RecoveryGuard {
    active: Arc<Mutex<HashSet<String>>>,
    app_id: String,
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.app_id);
    }
}

/// Aborts a spawned task when the owner goes away.
pub(crate) struct AbortOnDrop(pub(crate) AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
