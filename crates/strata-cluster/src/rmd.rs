//! Rebalance metadata (RMD)
//!
//! A tiny versioned epoch counter: bumping the version starts a new global
//! rebalance; the resilver flag additionally requests a local pass on every
//! target.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Rmd {
    pub version: u64,
    pub resilver: bool,
}

/// Publish-by-clone owner of the RMD
#[derive(Default)]
pub struct RmdOwner {
    cur: RwLock<Arc<Rmd>>,
}

impl RmdOwner {
    #[must_use]
    pub fn new(rmd: Rmd) -> Self {
        Self {
            cur: RwLock::new(Arc::new(rmd)),
        }
    }

    #[must_use]
    pub fn get(&self) -> Arc<Rmd> {
        Arc::clone(&self.cur.read())
    }

    /// Clone, apply `mutate`, bump the version, publish; returns the clone
    pub fn modify(&self, mutate: impl FnOnce(&mut Rmd)) -> Arc<Rmd> {
        let mut cur = self.cur.write();
        let mut clone = (**cur).clone();
        mutate(&mut clone);
        clone.version = cur.version + 1;
        let published = Arc::new(clone);
        *cur = Arc::clone(&published);
        published
    }

    /// Adopt a received RMD; stale versions are ignored
    pub fn receive(&self, rmd: Rmd) -> bool {
        let mut cur = self.cur.write();
        if rmd.version <= cur.version {
            return false;
        }
        *cur = Arc::new(rmd);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_bumps_epoch() {
        let owner = RmdOwner::default();
        let r = owner.modify(|rmd| rmd.resilver = true);
        assert_eq!(r.version, 1);
        assert!(r.resilver);
        let r = owner.modify(|rmd| rmd.resilver = false);
        assert_eq!(r.version, 2);
    }

    #[test]
    fn receive_monotone() {
        let owner = RmdOwner::default();
        assert!(owner.receive(Rmd { version: 3, resilver: false }));
        assert!(!owner.receive(Rmd { version: 2, resilver: true }));
        assert_eq!(owner.get().version, 3);
    }
}
