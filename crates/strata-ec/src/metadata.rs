//! EC slice metadata
//!
//! Every slice (and the main replica, as slice 0) carries a sidecar that
//! records the encoding geometry and checksums. The sidecar is persisted
//! before any payload leaves the node; it anchors recovery.

use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_common::checksum::Checksum;
use strata_common::Result;
use strata_fs::save_atomic;

/// Per-slice sidecar
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceMeta {
    /// Size of the original object
    pub size: u64,
    /// Number of data slices (k)
    pub data: usize,
    /// Number of parity slices (m)
    pub parity: usize,
    /// Replicated (small object) instead of sliced
    pub is_copy: bool,
    /// 0 for the main replica, 1..=k+m for slices
    pub slice_id: usize,
    /// Checksum of the whole object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj_cksum: Option<Checksum>,
    /// Checksum of this slice's payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_cksum: Option<Checksum>,
    /// Object version at encode time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj_version: Option<String>,
}

impl SliceMeta {
    /// Total slice count (k + m)
    #[must_use]
    pub fn slice_cnt(&self) -> usize {
        self.data + self.parity
    }

    /// Clone with a different slice id (the id is per destination)
    #[must_use]
    pub fn for_slice(&self, slice_id: usize) -> Self {
        let mut m = self.clone();
        m.slice_id = slice_id;
        if slice_id == 0 {
            m.slice_cksum = None;
        }
        m
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        save_atomic(path, &serde_json::to_vec(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Slice size for an object: `ceil(size / data)`, rounded up to an even
/// number of bytes (backend requirement) with a 64-byte floor.
#[must_use]
pub fn slice_size(obj_size: u64, data: usize) -> usize {
    let raw = (obj_size as usize).div_ceil(data.max(1)).max(64);
    (raw + 1) & !1
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::checksum::{Checksum, ChecksumType};

    #[test]
    fn slice_size_rules() {
        assert_eq!(slice_size(0, 2), 64); // floor
        assert_eq!(slice_size(128, 2), 64);
        assert_eq!(slice_size(130, 2), 66); // odd 65 rounded up
        assert_eq!(slice_size(3 * 1024 * 1024, 2), 3 * 1024 * 1024 / 2);
    }

    #[test]
    fn exact_boundary_needs_no_padding() {
        let size = 4 * slice_size(4 * 1024, 4) as u64;
        let ss = slice_size(size, 4);
        assert_eq!(ss as u64 * 4, size);
    }

    #[test]
    fn store_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        let meta = SliceMeta {
            size: 100,
            data: 2,
            parity: 1,
            is_copy: false,
            slice_id: 2,
            obj_cksum: Some(Checksum::compute(ChecksumType::Xxhash, b"obj")),
            slice_cksum: Some(Checksum::compute(ChecksumType::Xxhash, b"slice")),
            obj_version: Some("1".to_string()),
        };
        meta.store(&path).unwrap();
        assert_eq!(SliceMeta::load(&path).unwrap().unwrap(), meta);
        assert!(SliceMeta::load(dir.path().join("nope").as_path())
            .unwrap()
            .is_none());
    }

    #[test]
    fn for_slice_rewrites_id() {
        let meta = SliceMeta {
            size: 10,
            data: 2,
            parity: 1,
            is_copy: false,
            slice_id: 0,
            obj_cksum: None,
            slice_cksum: Some(Checksum::compute(ChecksumType::Xxhash, b"x")),
            obj_version: None,
        };
        assert_eq!(meta.for_slice(3).slice_id, 3);
        assert!(meta.for_slice(0).slice_cksum.is_none());
    }
}
