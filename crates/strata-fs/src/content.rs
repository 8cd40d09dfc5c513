//! Content types and FQN layout
//!
//! Canonical layout: `<mountpath>/<provider>/<bucket>/<content-type>/<obj>`.
//! An object's sidecars live under their own content types with the same
//! relative path, so a payload and its metadata only ever differ in one path
//! segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use strata_common::{Bck, ObjName};

/// On-disk content namespaces under a bucket directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// Object payload
    Obj,
    /// Object metadata sidecar (size, checksum, version)
    ObjMeta,
    /// EC slice metadata sidecar
    EcMeta,
    /// EC slice payload
    EcSlice,
    /// Temporary files, atomically renamed into place on success
    Workfile,
}

impl ContentType {
    /// Path segment for this content type
    #[must_use]
    pub const fn dir(&self) -> &'static str {
        match self {
            Self::Obj => "%ob",
            Self::ObjMeta => "%om",
            Self::EcMeta => "%mt",
            Self::EcSlice => "%ec",
            Self::Workfile => "%wk",
        }
    }

    pub const ALL: [ContentType; 5] = [
        Self::Obj,
        Self::ObjMeta,
        Self::EcMeta,
        Self::EcSlice,
        Self::Workfile,
    ];
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// Build the bucket directory under a mountpath root
#[must_use]
pub fn bucket_dir(mpath: &Path, bck: &Bck) -> PathBuf {
    mpath.join(bck.provider.as_str()).join(bck.name.as_str())
}

/// Build the fully qualified path of one content item
#[must_use]
pub fn fqn(mpath: &Path, bck: &Bck, ct: ContentType, obj: &ObjName) -> PathBuf {
    bucket_dir(mpath, bck).join(ct.dir()).join(obj.as_str())
}

/// Derive the sibling FQN of `obj_fqn` under a different content type.
///
/// `obj_fqn` must be a canonical object path; the content-type segment sits
/// right below the bucket directory.
#[must_use]
pub fn sibling_fqn(obj_fqn: &Path, from: ContentType, to: ContentType) -> Option<PathBuf> {
    let s = obj_fqn.to_str()?;
    let needle = format!("/{}/", from.dir());
    let idx = s.find(&needle)?;
    let mut out = String::with_capacity(s.len());
    out.push_str(&s[..idx]);
    out.push('/');
    out.push_str(to.dir());
    out.push_str(&s[idx + needle.len() - 1..]);
    Some(PathBuf::from(out))
}

/// Workfile path for `obj_fqn` with a distinguishing suffix
#[must_use]
pub fn workfile_fqn(obj_fqn: &Path, suffix: &str) -> Option<PathBuf> {
    let wk = sibling_fqn(obj_fqn, ContentType::Obj, ContentType::Workfile)?;
    let mut name = wk.file_name()?.to_os_string();
    name.push(format!(".{}.{}", suffix, std::process::id()));
    Some(wk.with_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::BucketName;

    fn bck() -> Bck {
        Bck::strata(BucketName::new_unchecked("b1"))
    }

    #[test]
    fn fqn_layout() {
        let p = fqn(
            Path::new("/mnt/disk0"),
            &bck(),
            ContentType::Obj,
            &ObjName::new_unchecked("dir/o1"),
        );
        assert_eq!(p, PathBuf::from("/mnt/disk0/strata/b1/%ob/dir/o1"));
    }

    #[test]
    fn sibling_swaps_one_segment() {
        let obj = PathBuf::from("/mnt/disk0/strata/b1/%ob/dir/o1");
        let meta = sibling_fqn(&obj, ContentType::Obj, ContentType::EcMeta).unwrap();
        assert_eq!(meta, PathBuf::from("/mnt/disk0/strata/b1/%mt/dir/o1"));
    }

    #[test]
    fn workfile_gets_suffix() {
        let obj = PathBuf::from("/mnt/disk0/strata/b1/%ob/o1");
        let wk = workfile_fqn(&obj, "ec").unwrap();
        let s = wk.to_str().unwrap();
        assert!(s.starts_with("/mnt/disk0/strata/b1/%wk/o1.ec."));
    }
}
