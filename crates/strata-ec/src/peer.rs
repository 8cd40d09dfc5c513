//! Local EC storage operations
//!
//! What a target does with slices and replicas on its own mountpaths, both
//! for its own encode/restore work and on behalf of peers hitting the
//! intra-cluster EC endpoints.

use crate::metadata::SliceMeta;
use strata_cluster::Lom;
use strata_common::checksum::ChecksumType;
use strata_common::{Error, Result};
use strata_fs::content::{sibling_fqn, ContentType};
use strata_fs::save_atomic;
use tracing::warn;

/// This target's EC sidecar for the object, if present
pub fn local_meta(lom: &Lom) -> Result<Option<SliceMeta>> {
    SliceMeta::load(&lom.ec_meta_fqn())
}

/// Store an incoming slice: payload under the slice content type, sidecar
/// under the meta content type
pub fn store_slice(lom: &Lom, meta: &SliceMeta, data: &[u8]) -> Result<()> {
    if meta.slice_id == 0 {
        return Err(Error::invalid_argument("slice id 0 is the main replica"));
    }
    let slice_fqn = sibling_fqn(lom.fqn(), ContentType::Obj, ContentType::EcSlice)
        .ok_or_else(|| Error::internal(format!("bad fqn {}", lom.fqn().display())))?;
    save_atomic(&slice_fqn, data)?;
    meta.store(&lom.ec_meta_fqn())
}

/// This target's slice payload for the object, if present
pub fn local_slice(lom: &Lom) -> Result<Option<Vec<u8>>> {
    let slice_fqn = sibling_fqn(lom.fqn(), ContentType::Obj, ContentType::EcSlice)
        .ok_or_else(|| Error::internal(format!("bad fqn {}", lom.fqn().display())))?;
    match std::fs::read(&slice_fqn) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Store an incoming full replica: object payload + LOM sidecar + EC sidecar
/// (slice 0)
pub fn store_replica(
    lom: &mut Lom,
    meta: &SliceMeta,
    data: &[u8],
    cksum_ty: ChecksumType,
) -> Result<()> {
    lom.save_payload(data, cksum_ty, false)?;
    meta.for_slice(0).store(&lom.ec_meta_fqn())
}

/// Erase whatever this target holds for the object: slice, replica, sidecars.
/// Best-effort; the authoritative "gone" state is the absence of the main
/// object on its owner.
pub fn cleanup(lom: &mut Lom) {
    if let Ok(Some(_)) = local_meta(lom) {
        if let Err(e) = std::fs::remove_file(lom.ec_meta_fqn()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(obj = %lom.uname(), %e, "failed to remove EC sidecar");
            }
        }
    }
    if let Some(slice_fqn) = sibling_fqn(lom.fqn(), ContentType::Obj, ContentType::EcSlice) {
        let _ = std::fs::remove_file(&slice_fqn);
    }
    if let Err(e) = lom.remove() {
        warn!(obj = %lom.uname(), %e, "failed to remove replica");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_common::{Bck, BucketName, ObjName};
    use strata_fs::Mountpaths;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Mountpaths>, Lom) {
        let dir = TempDir::new().unwrap();
        let mps = Arc::new(Mountpaths::new());
        mps.add(dir.path()).unwrap();
        let bck = Bck::strata(BucketName::new_unchecked("b1"));
        mps.create_bucket_dirs(&bck).unwrap();
        let lom = Lom::init(bck, ObjName::new_unchecked("o1"), &mps).unwrap();
        (dir, mps, lom)
    }

    fn meta(slice_id: usize) -> SliceMeta {
        SliceMeta {
            size: 5,
            data: 2,
            parity: 1,
            is_copy: false,
            slice_id,
            obj_cksum: None,
            slice_cksum: None,
            obj_version: None,
        }
    }

    #[test]
    fn slice_store_load_cleanup() {
        let (_dir, _mps, mut lom) = setup();
        assert!(local_meta(&lom).unwrap().is_none());
        store_slice(&lom, &meta(2), b"slice").unwrap();
        assert_eq!(local_meta(&lom).unwrap().unwrap().slice_id, 2);
        assert_eq!(local_slice(&lom).unwrap().unwrap(), b"slice");

        cleanup(&mut lom);
        assert!(local_meta(&lom).unwrap().is_none());
        assert!(local_slice(&lom).unwrap().is_none());
    }

    #[test]
    fn slice_zero_rejected() {
        let (_dir, _mps, lom) = setup();
        assert!(store_slice(&lom, &meta(0), b"x").is_err());
    }

    #[test]
    fn replica_store_is_a_full_object() {
        let (_dir, mps, mut lom) = setup();
        let m = meta(3); // id rewritten to 0 on store
        store_replica(&mut lom, &m, b"hello", ChecksumType::Xxhash).unwrap();

        let mut reread = Lom::init(
            Bck::strata(BucketName::new_unchecked("b1")),
            ObjName::new_unchecked("o1"),
            &mps,
        )
        .unwrap();
        assert!(reread.load().unwrap());
        assert_eq!(reread.load_payload().unwrap(), b"hello");
        assert_eq!(local_meta(&reread).unwrap().unwrap().slice_id, 0);
    }
}
