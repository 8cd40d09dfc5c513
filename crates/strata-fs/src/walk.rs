//! Filesystem walkers
//!
//! `walk` enumerates one mountpath's slice of a bucket. `walk_bck` runs one
//! walker per mountpath and merges their sorted streams through a min-heap,
//! yielding the bucket's objects in global name order without materializing
//! the full listing.

use crate::content::ContentType;
use crate::mountpath::{Mountpath, Mountpaths};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use strata_common::{Bck, Error, Result};
use tracing::{error, warn};
use walkdir::WalkDir;

/// Object-level errors tolerated before a walk halts
pub const ERR_THRESHOLD: usize = 1000;

/// Buffer size of each per-mountpath entry queue
pub const MPATH_QUEUE_SIZE: usize = 100;

/// One walked object
#[derive(Clone, Debug)]
pub struct WalkEntry {
    /// Full path of the content item
    pub fqn: PathBuf,
    /// Object name relative to the bucket's content root
    pub name: String,
    pub size: u64,
}

/// Single-mountpath walk options
pub struct WalkOptions {
    pub mpath: Arc<Mountpath>,
    pub bck: Bck,
    pub ct: ContentType,
    /// Emit entries in name order
    pub sorted: bool,
}

/// Multi-mountpath walk options
pub struct WalkBckOptions {
    pub bck: Bck,
    pub ct: ContentType,
    /// Polled between entries; a true return cancels every walker
    pub is_aborted: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

/// Walk one mountpath's content root for a bucket.
///
/// The callback is invoked per regular file. Bucket-level problems (an
/// unreadable root) halt the walk; object-level errors are counted and
/// skipped until [`ERR_THRESHOLD`] is crossed.
pub fn walk(opts: &WalkOptions, cb: &mut dyn FnMut(&WalkEntry) -> Result<()>) -> Result<()> {
    let root = opts.mpath.bucket_dir(&opts.bck).join(opts.ct.dir());
    if !root.exists() {
        return Ok(());
    }

    let mut soft_errors = 0usize;
    let mut wd = WalkDir::new(&root);
    if opts.sorted {
        wd = wd.sort_by_file_name();
    }
    for item in wd {
        let entry = match item {
            Ok(e) => e,
            Err(e) => {
                // An error on the root is a bucket-level problem.
                if e.path().map(|p| p == root).unwrap_or(true) {
                    error!(root = %root.display(), %e, "bucket walk failed");
                    return Err(Error::internal(format!("walk {}: {e}", root.display())));
                }
                soft_errors += 1;
                if soft_errors > ERR_THRESHOLD {
                    return Err(Error::internal(format!(
                        "walk {}: too many object errors ({soft_errors})",
                        root.display()
                    )));
                }
                warn!(%e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .strip_prefix(&root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        cb(&WalkEntry {
            fqn: entry.into_path(),
            name,
            size,
        })?;
    }
    Ok(())
}

/// Walk a bucket across all enabled mountpaths, merging per-mountpath sorted
/// streams into global name order.
pub fn walk_bck(
    mpaths: &Mountpaths,
    opts: &WalkBckOptions,
    cb: &mut dyn FnMut(&WalkEntry) -> Result<()>,
) -> Result<()> {
    let avail = mpaths.available();
    if avail.is_empty() {
        return Err(Error::NoMountpaths);
    }

    std::thread::scope(|scope| {
        let mut receivers = Vec::with_capacity(avail.len());
        let mut handles = Vec::with_capacity(avail.len());

        for mpath in &avail {
            let (tx, rx) = mpsc::sync_channel::<WalkEntry>(MPATH_QUEUE_SIZE);
            receivers.push(rx);
            let walk_opts = WalkOptions {
                mpath: Arc::clone(mpath),
                bck: opts.bck.clone(),
                ct: opts.ct,
                sorted: true,
            };
            let is_aborted = opts.is_aborted.clone();
            handles.push(scope.spawn(move || {
                walk(&walk_opts, &mut |entry| {
                    if let Some(ab) = &is_aborted {
                        if ab() {
                            return Err(Error::XactAborted(format!(
                                "mpath {}",
                                walk_opts.mpath.path().display()
                            )));
                        }
                    }
                    // A send fails only when the merge side bailed out early.
                    tx.send(entry.clone())
                        .map_err(|_| Error::XactAborted("merge closed".to_string()))
                })
            }));
        }

        // Min-heap of one pending entry per mountpath.
        let mut heap: BinaryHeap<Reverse<(String, usize)>> = BinaryHeap::new();
        let mut pending: Vec<Option<WalkEntry>> = vec![None; receivers.len()];
        for (idx, rx) in receivers.iter().enumerate() {
            if let Ok(entry) = rx.recv() {
                heap.push(Reverse((entry.name.clone(), idx)));
                pending[idx] = Some(entry);
            }
        }

        let mut merge_result: Result<()> = Ok(());
        while let Some(Reverse((_, idx))) = heap.pop() {
            let entry = pending[idx].take().expect("heap entry has a pending item");
            if let Err(e) = cb(&entry) {
                merge_result = Err(e);
                break;
            }
            if let Ok(next) = receivers[idx].recv() {
                heap.push(Reverse((next.name.clone(), idx)));
                pending[idx] = Some(next);
            }
        }
        // Dropping the receivers unblocks any walker still sending.
        drop(receivers);

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                // Walkers cancelled by an early merge exit are expected.
                Ok(Err(Error::XactAborted(_))) if merge_result.is_ok() => {}
                Ok(Err(e)) => {
                    if merge_result.is_ok() {
                        merge_result = Err(e);
                    }
                }
                Err(_) => {
                    if merge_result.is_ok() {
                        merge_result = Err(Error::internal("mountpath walker panicked"));
                    }
                }
            }
        }
        merge_result
    })
}

/// Single-level directory scan
pub fn scan(dir: &std::path::Path, cb: &mut dyn FnMut(&WalkEntry) -> Result<()>) -> Result<()> {
    let rd = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for item in rd {
        let entry = item?;
        let md = entry.metadata()?;
        if !md.is_file() {
            continue;
        }
        cb(&WalkEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            fqn: entry.path(),
            size: md.len(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::{BucketName, ObjName};
    use tempfile::TempDir;

    fn bck() -> Bck {
        Bck::strata(BucketName::new_unchecked("b1"))
    }

    fn put_obj(mpath: &Mountpath, name: &str, data: &[u8]) {
        let fqn = mpath.make_fqn(&bck(), ContentType::Obj, &ObjName::new_unchecked(name));
        std::fs::create_dir_all(fqn.parent().unwrap()).unwrap();
        std::fs::write(fqn, data).unwrap();
    }

    fn setup(n: usize) -> (Vec<TempDir>, Mountpaths) {
        let dirs: Vec<TempDir> = (0..n).map(|_| TempDir::new().unwrap()).collect();
        let mps = Mountpaths::new();
        for d in &dirs {
            mps.add(d.path()).unwrap();
        }
        (dirs, mps)
    }

    #[test]
    fn walk_missing_root_is_empty() {
        let (_dirs, mps) = setup(1);
        let opts = WalkOptions {
            mpath: mps.available().remove(0),
            bck: bck(),
            ct: ContentType::Obj,
            sorted: true,
        };
        let mut seen = 0;
        walk(&opts, &mut |_| {
            seen += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, 0);
    }

    #[test]
    fn walk_sorted_single_mountpath() {
        let (_dirs, mps) = setup(1);
        let mpath = mps.available().remove(0);
        put_obj(&mpath, "c", b"3");
        put_obj(&mpath, "a", b"1");
        put_obj(&mpath, "b/nested", b"2");

        let opts = WalkOptions {
            mpath,
            bck: bck(),
            ct: ContentType::Obj,
            sorted: true,
        };
        let mut names = Vec::new();
        walk(&opts, &mut |e| {
            names.push(e.name.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(names, vec!["a", "b/nested", "c"]);
    }

    #[test]
    fn walk_bck_merges_in_global_order() {
        let (_dirs, mps) = setup(3);
        let avail = mps.available();
        put_obj(&avail[0], "b", b"x");
        put_obj(&avail[0], "e", b"x");
        put_obj(&avail[1], "a", b"x");
        put_obj(&avail[1], "d", b"x");
        put_obj(&avail[2], "c", b"x");

        let opts = WalkBckOptions {
            bck: bck(),
            ct: ContentType::Obj,
            is_aborted: None,
        };
        let mut names = Vec::new();
        walk_bck(&mps, &opts, &mut |e| {
            names.push(e.name.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn walk_bck_abort_propagates() {
        let (_dirs, mps) = setup(2);
        let avail = mps.available();
        for i in 0..50 {
            put_obj(&avail[0], &format!("m0-{i:03}"), b"x");
            put_obj(&avail[1], &format!("m1-{i:03}"), b"x");
        }

        let aborted = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&aborted);
        let opts = WalkBckOptions {
            bck: bck(),
            ct: ContentType::Obj,
            is_aborted: Some(Arc::new(move || {
                flag.load(std::sync::atomic::Ordering::Relaxed)
            })),
        };
        let mut seen = 0usize;
        let res = walk_bck(&mps, &opts, &mut |_| {
            seen += 1;
            if seen == 5 {
                aborted.store(true, std::sync::atomic::Ordering::Relaxed);
            }
            Ok(())
        });
        assert!(matches!(res, Err(Error::XactAborted(_))));
        assert!(seen < 100);
    }

    #[test]
    fn scan_is_single_level() {
        let (_dirs, mps) = setup(1);
        let mpath = mps.available().remove(0);
        put_obj(&mpath, "top", b"x");
        put_obj(&mpath, "dir/nested", b"x");

        let root = mpath.bucket_dir(&bck()).join(ContentType::Obj.dir());
        let mut names = Vec::new();
        scan(&root, &mut |e| {
            names.push(e.name.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(names, vec!["top"]);
    }
}
