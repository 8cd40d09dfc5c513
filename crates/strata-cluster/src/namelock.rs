//! Per-name lock pairs
//!
//! The proxy serializes conflicting structural operations on the same bucket
//! with a per-name reader/writer lock; `try_lock` lets concurrent conflicting
//! operations fail fast with `BucketIsBusy`. Guards are owned values, so a
//! lock taken by a transaction can be released later from the notification
//! callback that learns all targets have finished.
//!
//! The same table keyed by uname provides per-object (LOM) locks on targets.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Owned write guard over one name
pub type NameWriteGuard = OwnedRwLockWriteGuard<()>;
/// Owned read guard over one name
pub type NameReadGuard = OwnedRwLockReadGuard<()>;

/// Lock pair for one name
#[derive(Clone)]
pub struct NameLockPair {
    lock: Arc<RwLock<()>>,
}

impl NameLockPair {
    /// Exclusive lock; waits
    pub async fn lock(&self) -> NameWriteGuard {
        Arc::clone(&self.lock).write_owned().await
    }

    /// Exclusive lock; `None` if the name is busy
    #[must_use]
    pub fn try_lock(&self) -> Option<NameWriteGuard> {
        Arc::clone(&self.lock).try_write_owned().ok()
    }

    /// Shared lock; waits
    pub async fn rlock(&self) -> NameReadGuard {
        Arc::clone(&self.lock).read_owned().await
    }

    /// Shared lock; `None` if an exclusive holder exists
    #[must_use]
    pub fn try_rlock(&self) -> Option<NameReadGuard> {
        Arc::clone(&self.lock).try_read_owned().ok()
    }
}

/// Table of name → lock pair
#[derive(Default)]
pub struct NameLocker {
    table: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl NameLocker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock pair for `name`; created on first use
    #[must_use]
    pub fn pair(&self, name: &str) -> NameLockPair {
        let mut table = self.table.lock();
        let lock = table
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone();
        NameLockPair { lock }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_lock_conflicts() {
        let locker = NameLocker::new();
        let pair = locker.pair("strata/b1");
        let guard = pair.try_lock().expect("uncontended");

        // same name: busy
        assert!(locker.pair("strata/b1").try_lock().is_none());
        assert!(locker.pair("strata/b1").try_rlock().is_none());
        // different name: free
        assert!(locker.pair("strata/b2").try_lock().is_some());

        drop(guard);
        assert!(locker.pair("strata/b1").try_lock().is_some());
    }

    #[tokio::test]
    async fn readers_share_writers_exclude() {
        let locker = NameLocker::new();
        let r1 = locker.pair("n").try_rlock().unwrap();
        let r2 = locker.pair("n").try_rlock().unwrap();
        assert!(locker.pair("n").try_lock().is_none());
        drop(r1);
        drop(r2);
        assert!(locker.pair("n").try_lock().is_some());
    }

    #[tokio::test]
    async fn guard_release_from_elsewhere() {
        let locker = NameLocker::new();
        let guard = locker.pair("n").try_lock().unwrap();
        // move the owned guard into another task (the notification callback)
        let handle = tokio::spawn(async move {
            drop(guard);
        });
        handle.await.unwrap();
        assert!(locker.pair("n").try_lock().is_some());
    }
}
