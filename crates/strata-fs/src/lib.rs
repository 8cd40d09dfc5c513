//! Strata FS - mountpaths, on-disk layout, and filesystem walkers
//!
//! A target owns one or more mountpaths (local filesystems). This crate keeps
//! the registry of mountpaths, maps objects and their sidecars to fully
//! qualified paths, and provides the single- and multi-mountpath walkers used
//! by listing and rebalance.

pub mod content;
pub mod mountpath;
pub mod walk;

pub use content::ContentType;
pub use mountpath::{Mountpath, Mountpaths, MpathEventRunner};
pub use walk::{scan, walk, walk_bck, WalkBckOptions, WalkEntry, WalkOptions};

/// Atomically persist `data` at `path` via a temp file + rename.
///
/// The temp file lives in the same directory so the rename never crosses a
/// filesystem boundary.
pub fn save_atomic(path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("wk"),
        std::process::id()
    ));
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}
