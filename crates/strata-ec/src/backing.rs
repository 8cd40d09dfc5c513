//! Slice backing: memory or workfile
//!
//! The encode path stages outbound slices either in memory or through
//! mountpath workfiles, depending on how much buffer space the object needs.
//! Senders see one abstraction either way, and `release` frees whichever
//! resource backs the slice once the transfer completes.

use bytes::Bytes;
use std::io::Read;
use std::path::PathBuf;
use strata_common::Result;
use strata_fs::save_atomic;
use tracing::warn;

/// Where a staged slice's bytes live
#[derive(Debug)]
pub enum SliceBacking {
    Mem(Bytes),
    File(PathBuf),
}

impl SliceBacking {
    /// Stage `data` on disk at `path`
    pub fn to_file(path: PathBuf, data: &[u8]) -> Result<Self> {
        save_atomic(&path, data)?;
        Ok(Self::File(path))
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Mem(b) => b.len() as u64,
            Self::File(p) => std::fs::metadata(p).map(|m| m.len()).unwrap_or(0),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a fresh reader over the slice; reopenable any number of times
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        match self {
            Self::Mem(b) => Ok(Box::new(std::io::Cursor::new(b.clone()))),
            Self::File(p) => Ok(Box::new(std::fs::File::open(p)?)),
        }
    }

    /// Full contents; memory backing is zero-copy
    pub fn read_all(&self) -> Result<Bytes> {
        match self {
            Self::Mem(b) => Ok(b.clone()),
            Self::File(p) => Ok(Bytes::from(std::fs::read(p)?)),
        }
    }

    /// Free the backing resource after the transfer completes
    pub fn release(self) {
        match self {
            Self::Mem(_) => {}
            Self::File(p) => {
                if let Err(e) = std::fs::remove_file(&p) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %p.display(), %e, "failed to remove workfile");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_backing_reopens() {
        let b = SliceBacking::Mem(Bytes::from_static(b"hello"));
        for _ in 0..2 {
            let mut buf = Vec::new();
            b.open().unwrap().read_to_end(&mut buf).unwrap();
            assert_eq!(buf, b"hello");
        }
        assert_eq!(b.len(), 5);
        b.release();
    }

    #[test]
    fn file_backing_release_removes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("slice.wk");
        let b = SliceBacking::to_file(path.clone(), b"payload").unwrap();
        assert_eq!(b.read_all().unwrap().as_ref(), b"payload");
        b.release();
        assert!(!path.exists());
    }
}
