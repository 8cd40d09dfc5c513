//! Local object metadata (LOM)
//!
//! A LOM is the target-side handle of one object: bucket, name, resolved
//! mountpath and FQN, and the persisted state (size, access time, checksum,
//! version) kept in a metadata sidecar next to the payload. An object is
//! either a self-consistent `(payload, sidecar)` pair or it is absent;
//! payloads are written through a workfile and renamed into place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use strata_common::checksum::{Checksum, ChecksumType};
use strata_common::{Bck, Error, ObjName, Result};
use strata_fs::content::{workfile_fqn, ContentType};
use strata_fs::{save_atomic, Mountpath, Mountpaths};

/// Persisted LOM state (the sidecar payload)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LomMeta {
    pub size: u64,
    /// Last access, seconds since the epoch
    pub atime: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cksum: Option<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

/// Target-side object handle
#[derive(Clone, Debug)]
pub struct Lom {
    bck: Bck,
    objname: ObjName,
    mpath: Arc<Mountpath>,
    fqn: PathBuf,
    meta: Option<LomMeta>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Lom {
    /// Resolve the owning mountpath (HRW over the uname) and build the FQN
    pub fn init(bck: Bck, objname: ObjName, mpaths: &Mountpaths) -> Result<Self> {
        let uname = bck.make_uname(&objname);
        let mpath = mpaths.hrw_mpath(&uname)?;
        let fqn = mpath.make_fqn(&bck, ContentType::Obj, &objname);
        Ok(Self {
            bck,
            objname,
            mpath,
            fqn,
            meta: None,
        })
    }

    #[must_use]
    pub fn bck(&self) -> &Bck {
        &self.bck
    }

    #[must_use]
    pub fn objname(&self) -> &ObjName {
        &self.objname
    }

    #[must_use]
    pub fn uname(&self) -> String {
        self.bck.make_uname(&self.objname)
    }

    #[must_use]
    pub fn fqn(&self) -> &Path {
        &self.fqn
    }

    #[must_use]
    pub fn mpath(&self) -> &Arc<Mountpath> {
        &self.mpath
    }

    /// The LOM sidecar path
    #[must_use]
    pub fn meta_fqn(&self) -> PathBuf {
        self.mpath
            .make_fqn(&self.bck, ContentType::ObjMeta, &self.objname)
    }

    /// The EC metadata sidecar path for this object
    #[must_use]
    pub fn ec_meta_fqn(&self) -> PathBuf {
        self.mpath
            .make_fqn(&self.bck, ContentType::EcMeta, &self.objname)
    }

    /// A workfile path for staged writes of this object
    pub fn workfile(&self, suffix: &str) -> Result<PathBuf> {
        workfile_fqn(&self.fqn, suffix)
            .ok_or_else(|| Error::internal(format!("bad fqn {}", self.fqn.display())))
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.meta.as_ref().map(|m| m.size).unwrap_or(0)
    }

    #[must_use]
    pub fn cksum(&self) -> Option<&Checksum> {
        self.meta.as_ref().and_then(|m| m.cksum.as_ref())
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.version.as_deref())
    }

    #[must_use]
    pub fn meta(&self) -> Option<&LomMeta> {
        self.meta.as_ref()
    }

    /// Load persisted state. `Ok(true)` iff payload and sidecar both exist;
    /// a payload without a sidecar (or vice versa) counts as absent.
    pub fn load(&mut self) -> Result<bool> {
        if !self.fqn.is_file() {
            self.meta = None;
            return Ok(false);
        }
        let meta_fqn = self.meta_fqn();
        match std::fs::read(&meta_fqn) {
            Ok(data) => {
                self.meta = Some(serde_json::from_slice(&data)?);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.meta = None;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the in-memory sidecar state
    pub fn persist(&self) -> Result<()> {
        let meta = self
            .meta
            .as_ref()
            .ok_or_else(|| Error::internal("persisting a LOM with no state"))?;
        save_atomic(&self.meta_fqn(), &serde_json::to_vec(meta)?)?;
        Ok(())
    }

    /// Write the payload via workfile + rename, checksum it, and persist the
    /// sidecar. The previous version (if any) determines the next one.
    pub fn save_payload(
        &mut self,
        data: &[u8],
        cksum_ty: ChecksumType,
        versioning: bool,
    ) -> Result<()> {
        let next_version = if versioning {
            let next = self
                .version()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            Some(next.to_string())
        } else {
            Some("1".to_string())
        };

        let wk = self.workfile("put")?;
        save_atomic(&wk, data)?;
        if let Some(dir) = self.fqn.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::rename(&wk, &self.fqn)?;

        self.meta = Some(LomMeta {
            size: data.len() as u64,
            atime: unix_now(),
            cksum: Some(Checksum::compute(cksum_ty, data)),
            version: next_version,
            custom: self
                .meta
                .take()
                .map(|m| m.custom)
                .unwrap_or_default(),
        });
        self.persist()
    }

    /// Read the full payload
    pub fn load_payload(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.fqn).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound {
                    bucket: self.bck.to_string(),
                    object: self.objname.to_string(),
                }
            } else {
                e.into()
            }
        })
    }

    /// Set a custom metadata entry and persist the sidecar
    pub fn set_custom(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let meta = self
            .meta
            .as_mut()
            .ok_or_else(|| Error::internal("custom metadata on an unloaded LOM"))?;
        meta.custom.insert(key.into(), value.into());
        self.persist()
    }

    /// Touch the access time (best-effort)
    pub fn touch(&mut self) {
        if let Some(meta) = &mut self.meta {
            meta.atime = unix_now();
            let _ = self.persist();
        }
    }

    /// Remove payload and sidecars
    pub fn remove(&mut self) -> Result<()> {
        for path in [
            self.fqn.clone(),
            self.meta_fqn(),
            self.ec_meta_fqn(),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.meta = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::BucketName;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Mountpaths, Bck) {
        let dir = TempDir::new().unwrap();
        let mps = Mountpaths::new();
        mps.add(dir.path()).unwrap();
        let bck = Bck::strata(BucketName::new_unchecked("b1"));
        mps.create_bucket_dirs(&bck).unwrap();
        (dir, mps, bck)
    }

    #[test]
    fn save_load_roundtrip() {
        let (_dir, mps, bck) = setup();
        let mut lom = Lom::init(bck.clone(), ObjName::new_unchecked("o1"), &mps).unwrap();
        assert!(!lom.load().unwrap());

        lom.save_payload(b"hello", ChecksumType::Xxhash, false).unwrap();

        let mut reread = Lom::init(bck, ObjName::new_unchecked("o1"), &mps).unwrap();
        assert!(reread.load().unwrap());
        assert_eq!(reread.size(), 5);
        assert_eq!(reread.load_payload().unwrap(), b"hello");
        assert!(reread.cksum().unwrap().verify(b"hello"));
    }

    #[test]
    fn payload_without_sidecar_is_absent() {
        let (_dir, mps, bck) = setup();
        let mut lom = Lom::init(bck, ObjName::new_unchecked("o2"), &mps).unwrap();
        std::fs::create_dir_all(lom.fqn().parent().unwrap()).unwrap();
        std::fs::write(lom.fqn(), b"orphan").unwrap();
        assert!(!lom.load().unwrap());
    }

    #[test]
    fn versioning_increments() {
        let (_dir, mps, bck) = setup();
        let mut lom = Lom::init(bck, ObjName::new_unchecked("o3"), &mps).unwrap();
        lom.save_payload(b"v1", ChecksumType::Xxhash, true).unwrap();
        assert_eq!(lom.version(), Some("1"));
        lom.save_payload(b"v2", ChecksumType::Xxhash, true).unwrap();
        assert_eq!(lom.version(), Some("2"));
    }

    #[test]
    fn remove_clears_the_triple() {
        let (_dir, mps, bck) = setup();
        let mut lom = Lom::init(bck, ObjName::new_unchecked("o4"), &mps).unwrap();
        lom.save_payload(b"data", ChecksumType::Xxhash, false).unwrap();
        lom.remove().unwrap();
        assert!(!lom.load().unwrap());
        assert!(matches!(
            lom.load_payload(),
            Err(Error::ObjectNotFound { .. })
        ));
    }
}
