//! Bucket metadata (BMD)
//!
//! The BMD is the versioned registry of bucket configurations, mutated only
//! on the primary proxy under its owner's write lock and disseminated by the
//! metasyncer. Targets persist the BMD to disk and reload it at boot; a newer
//! version from the primary always wins.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use strata_common::{Bck, BucketName, BucketProps, Provider, Result};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Versioned bucket registry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bmd {
    pub version: u64,
    pub uuid: String,
    pub providers: BTreeMap<Provider, BTreeMap<BucketName, BucketProps>>,
}

impl Bmd {
    #[must_use]
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            version: 1,
            uuid: uuid.into(),
            providers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, bck: &Bck) -> Option<&BucketProps> {
        self.providers.get(&bck.provider)?.get(&bck.name)
    }

    #[must_use]
    pub fn exists(&self, bck: &Bck) -> bool {
        self.get(bck).is_some()
    }

    /// Add a bucket; false if it already exists
    pub fn add(&mut self, bck: &Bck, props: BucketProps) -> bool {
        let buckets = self.providers.entry(bck.provider).or_default();
        if buckets.contains_key(&bck.name) {
            return false;
        }
        buckets.insert(bck.name.clone(), props);
        true
    }

    /// Delete a bucket; false if absent
    pub fn del(&mut self, bck: &Bck) -> bool {
        self.providers
            .get_mut(&bck.provider)
            .map(|b| b.remove(&bck.name).is_some())
            .unwrap_or(false)
    }

    /// Replace an existing bucket's props; false if absent
    pub fn set(&mut self, bck: &Bck, props: BucketProps) -> bool {
        match self.providers.get_mut(&bck.provider).and_then(|b| b.get_mut(&bck.name)) {
            Some(slot) => {
                *slot = props;
                true
            }
            None => false,
        }
    }

    /// Bucket count across providers
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.providers.values().map(BTreeMap::len).sum()
    }
}

/// Publish-by-clone owner of the BMD.
///
/// `lock()` serializes mutators (the txn protocol holds it across clone,
/// publish, and metasync dispatch); readers call `get()` lock-free.
pub struct BmdOwner {
    mutate: Mutex<()>,
    cur: RwLock<Arc<Bmd>>,
    persist_path: Option<PathBuf>,
}

impl BmdOwner {
    #[must_use]
    pub fn new(bmd: Bmd) -> Self {
        Self {
            mutate: Mutex::new(()),
            cur: RwLock::new(Arc::new(bmd)),
            persist_path: None,
        }
    }

    /// Persist published versions at `path` (atomic temp-then-rename)
    #[must_use]
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }

    /// Load a previously persisted BMD, if any
    pub fn load(path: &std::path::Path) -> Result<Option<Bmd>> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize mutators; hold the guard until the new version is published
    /// (and, on the primary, handed to the metasyncer)
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutate.lock().await
    }

    /// Current snapshot
    #[must_use]
    pub fn get(&self) -> Arc<Bmd> {
        Arc::clone(&self.cur.read())
    }

    /// Clone the current snapshot for mutation
    #[must_use]
    pub fn clone_bmd(&self) -> Bmd {
        (**self.cur.read()).clone()
    }

    /// Publish a mutated clone, bumping its version by exactly one.
    ///
    /// Callers must hold the mutators' lock. One publish = one version bump,
    /// regardless of how many buckets the clone touched.
    pub fn put(&self, mut clone: Bmd) -> Arc<Bmd> {
        let mut cur = self.cur.write();
        clone.version = cur.version + 1;
        let published = Arc::new(clone);
        *cur = Arc::clone(&published);
        drop(cur);
        self.persist(&published);
        published
    }

    /// Adopt a (newer) BMD received via metasync; stale versions are ignored
    pub fn receive(&self, bmd: Bmd) -> bool {
        let mut cur = self.cur.write();
        if bmd.version <= cur.version {
            warn!(
                have = cur.version,
                got = bmd.version,
                "ignoring stale BMD"
            );
            return false;
        }
        let published = Arc::new(bmd);
        *cur = Arc::clone(&published);
        drop(cur);
        self.persist(&published);
        info!(version = published.version, "adopted BMD");
        true
    }

    fn persist(&self, bmd: &Bmd) {
        let Some(path) = &self.persist_path else {
            return;
        };
        match serde_json::to_vec_pretty(bmd) {
            Ok(data) => {
                if let Err(e) = strata_fs::save_atomic(path, &data) {
                    warn!(path = %path.display(), %e, "failed to persist BMD");
                }
            }
            Err(e) => warn!(%e, "failed to serialize BMD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bck(name: &str) -> Bck {
        Bck::strata(BucketName::new_unchecked(name))
    }

    #[test]
    fn add_del_set() {
        let mut bmd = Bmd::new("u1");
        assert!(bmd.add(&bck("b1"), BucketProps::default()));
        assert!(!bmd.add(&bck("b1"), BucketProps::default()));
        assert!(bmd.exists(&bck("b1")));
        assert!(bmd.set(&bck("b1"), BucketProps::default()));
        assert!(!bmd.set(&bck("b2"), BucketProps::default()));
        assert!(bmd.del(&bck("b1")));
        assert!(!bmd.del(&bck("b1")));
    }

    #[tokio::test]
    async fn publish_bumps_version_once() {
        let owner = BmdOwner::new(Bmd::new("u1"));
        let _guard = owner.lock().await;
        let mut clone = owner.clone_bmd();
        // two mutations, one publish, one bump
        assert!(clone.add(&bck("b1"), BucketProps::default()));
        assert!(clone.add(&bck("b2"), BucketProps::default()));
        let published = owner.put(clone);
        assert_eq!(published.version, 2);
        assert_eq!(owner.get().version, 2);
    }

    #[tokio::test]
    async fn create_destroy_restores_contents() {
        let owner = BmdOwner::new(Bmd::new("u1"));
        let before = owner.get();

        {
            let _g = owner.lock().await;
            let mut clone = owner.clone_bmd();
            clone.add(&bck("b1"), BucketProps::default());
            owner.put(clone);
        }
        {
            let _g = owner.lock().await;
            let mut clone = owner.clone_bmd();
            clone.del(&bck("b1"));
            owner.put(clone);
        }

        let after = owner.get();
        assert_eq!(after.num_buckets(), before.num_buckets());
        assert!(after.version > before.version); // modulo monotone bumps
    }

    #[test]
    fn receive_is_version_monotone() {
        let owner = BmdOwner::new(Bmd::new("u1"));
        let mut newer = Bmd::new("u1");
        newer.version = 5;
        assert!(owner.receive(newer.clone()));
        assert!(!owner.receive(newer)); // same version again: stale
        assert_eq!(owner.get().version, 5);
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".strata.bmd");
        let owner = BmdOwner::new(Bmd::new("u1")).with_persistence(path.clone());
        let mut clone = owner.clone_bmd();
        clone.add(&bck("b1"), BucketProps::default());
        owner.put(clone);

        let loaded = BmdOwner::load(&path).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert!(loaded.exists(&bck("b1")));
        assert!(BmdOwner::load(&dir.path().join("nope")).unwrap().is_none());
    }
}
