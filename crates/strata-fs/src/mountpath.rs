//! Mountpath registry
//!
//! Mountpaths are the target's local filesystems. The registry supports
//! add/remove and enable/disable; enable/disable only report a change when
//! the state actually flipped, which lets the run-group skip redundant
//! fan-outs. Object-to-mountpath mapping uses rendezvous (HRW) hashing over
//! the object's uname, so a mountpath change remaps the minimum number of
//! objects.

use crate::content::{self, ContentType};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_common::{Bck, Error, ObjName, Provider, Result};
use tracing::info;
use xxhash_rust::xxh64::xxh64;

/// Subsystems that maintain per-mountpath state (joggers, caches) implement
/// this and register with the target's run-group, which fans every mountpath
/// event out to all of them. Fan-out is best-effort: a runner's failure is
/// logged by the run-group, never propagated.
pub trait MpathEventRunner: Send + Sync {
    fn name(&self) -> &'static str;
    fn req_add(&self, mpath: &Path);
    fn req_remove(&self, mpath: &Path);
    fn req_enable(&self, mpath: &Path);
    fn req_disable(&self, mpath: &Path);
}

/// One local filesystem owned by the target
#[derive(Debug)]
pub struct Mountpath {
    path: PathBuf,
    enabled: AtomicBool,
}

impl Mountpath {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            enabled: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// FQN of one content item on this mountpath
    #[must_use]
    pub fn make_fqn(&self, bck: &Bck, ct: ContentType, obj: &ObjName) -> PathBuf {
        content::fqn(&self.path, bck, ct, obj)
    }

    /// Bucket directory root on this mountpath
    #[must_use]
    pub fn bucket_dir(&self, bck: &Bck) -> PathBuf {
        content::bucket_dir(&self.path, bck)
    }
}

/// Registry of the target's mountpaths
#[derive(Default)]
pub struct Mountpaths {
    paths: RwLock<Vec<Arc<Mountpath>>>,
}

impl Mountpaths {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mountpath; the directory must exist
    pub fn add(&self, path: impl Into<PathBuf>) -> Result<Arc<Mountpath>> {
        let path = path.into();
        if !path.is_dir() {
            return Err(Error::MountpathNotFound(path.display().to_string()));
        }
        let mut paths = self.paths.write();
        if paths.iter().any(|m| m.path == path) {
            return Err(Error::invalid_argument(format!(
                "mountpath {} already registered",
                path.display()
            )));
        }
        let mpath = Arc::new(Mountpath::new(path));
        paths.push(Arc::clone(&mpath));
        paths.sort_by(|a, b| a.path.cmp(&b.path));
        info!(mpath = %mpath.path.display(), "added mountpath");
        Ok(mpath)
    }

    /// Remove a mountpath; returns it if it was registered
    pub fn remove(&self, path: &Path) -> Result<Arc<Mountpath>> {
        let mut paths = self.paths.write();
        let idx = paths
            .iter()
            .position(|m| m.path == path)
            .ok_or_else(|| Error::MountpathNotFound(path.display().to_string()))?;
        let removed = paths.remove(idx);
        info!(mpath = %path.display(), "removed mountpath");
        Ok(removed)
    }

    /// Enable a mountpath; `Ok(true)` iff the state flipped
    pub fn enable(&self, path: &Path) -> Result<bool> {
        let mpath = self.lookup(path)?;
        Ok(!mpath.enabled.swap(true, Ordering::AcqRel))
    }

    /// Disable a mountpath; `Ok(true)` iff the state flipped
    pub fn disable(&self, path: &Path) -> Result<bool> {
        let mpath = self.lookup(path)?;
        Ok(mpath.enabled.swap(false, Ordering::AcqRel))
    }

    fn lookup(&self, path: &Path) -> Result<Arc<Mountpath>> {
        self.paths
            .read()
            .iter()
            .find(|m| m.path == path)
            .cloned()
            .ok_or_else(|| Error::MountpathNotFound(path.display().to_string()))
    }

    /// Enabled mountpaths, in stable (path) order
    #[must_use]
    pub fn available(&self) -> Vec<Arc<Mountpath>> {
        self.paths
            .read()
            .iter()
            .filter(|m| m.is_enabled())
            .cloned()
            .collect()
    }

    /// All registered mountpaths, enabled or not
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Mountpath>> {
        self.paths.read().clone()
    }

    /// HRW-select the mountpath owning `uname`
    pub fn hrw_mpath(&self, uname: &str) -> Result<Arc<Mountpath>> {
        let avail = self.available();
        let key = xxh64(uname.as_bytes(), 0);
        avail
            .into_iter()
            .max_by_key(|m| {
                let s = m.path.to_string_lossy();
                xxh64(s.as_bytes(), key)
            })
            .ok_or(Error::NoMountpaths)
    }

    /// Create the canonical per-provider/content-type directories for `bck`
    /// on every available mountpath
    pub fn create_bucket_dirs(&self, bck: &Bck) -> Result<()> {
        for mpath in self.available() {
            for ct in ContentType::ALL {
                std::fs::create_dir_all(mpath.bucket_dir(bck).join(ct.dir()))?;
            }
        }
        Ok(())
    }

    /// Create provider roots on one mountpath (done when a mountpath is added)
    pub fn create_provider_dirs(&self, mpath: &Mountpath) -> Result<()> {
        for provider in [Provider::Strata, Provider::Cloud] {
            std::fs::create_dir_all(mpath.path().join(provider.as_str()))?;
        }
        Ok(())
    }

    /// Remove all of `bck`'s content from every mountpath
    pub fn destroy_bucket_dirs(&self, bck: &Bck) -> Result<()> {
        for mpath in self.available() {
            let dir = mpath.bucket_dir(bck);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::BucketName;
    use tempfile::TempDir;

    fn registry(n: usize) -> (Vec<TempDir>, Mountpaths) {
        let dirs: Vec<TempDir> = (0..n).map(|_| TempDir::new().unwrap()).collect();
        let mps = Mountpaths::new();
        for d in &dirs {
            mps.add(d.path()).unwrap();
        }
        (dirs, mps)
    }

    #[test]
    fn add_remove() {
        let (dirs, mps) = registry(2);
        assert_eq!(mps.available().len(), 2);
        mps.remove(dirs[0].path()).unwrap();
        assert_eq!(mps.available().len(), 1);
        assert!(mps.remove(dirs[0].path()).is_err());
    }

    #[test]
    fn add_rejects_duplicates_and_missing() {
        let (dirs, mps) = registry(1);
        assert!(mps.add(dirs[0].path()).is_err());
        assert!(mps.add("/definitely/not/there").is_err());
    }

    #[test]
    fn enable_disable_report_flips_only() {
        let (dirs, mps) = registry(2);
        let p = dirs[0].path();
        assert!(mps.disable(p).unwrap());
        assert!(!mps.disable(p).unwrap()); // already disabled
        assert_eq!(mps.available().len(), 1);
        assert!(mps.enable(p).unwrap());
        assert!(!mps.enable(p).unwrap()); // already enabled
        assert_eq!(mps.available().len(), 2);
    }

    #[test]
    fn hrw_is_deterministic_and_skips_disabled() {
        let (dirs, mps) = registry(3);
        let picked = mps.hrw_mpath("strata/b1/obj").unwrap();
        for _ in 0..10 {
            assert_eq!(mps.hrw_mpath("strata/b1/obj").unwrap().path(), picked.path());
        }
        mps.disable(picked.path()).unwrap();
        let repicked = mps.hrw_mpath("strata/b1/obj").unwrap();
        assert_ne!(repicked.path(), picked.path());
        drop(dirs);
    }

    #[test]
    fn hrw_with_no_mountpaths() {
        let mps = Mountpaths::new();
        assert!(matches!(
            mps.hrw_mpath("strata/b1/obj"),
            Err(Error::NoMountpaths)
        ));
    }

    #[test]
    fn bucket_dirs_created() {
        let (dirs, mps) = registry(2);
        let bck = Bck::strata(BucketName::new_unchecked("b1"));
        mps.create_bucket_dirs(&bck).unwrap();
        for d in &dirs {
            assert!(d.path().join("strata/b1/%ob").is_dir());
            assert!(d.path().join("strata/b1/%mt").is_dir());
        }
        mps.destroy_bucket_dirs(&bck).unwrap();
        for d in &dirs {
            assert!(!d.path().join("strata/b1").exists());
        }
    }
}
