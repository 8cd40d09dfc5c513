//! Local n-way mirroring
//!
//! Make-n-copies contract: after the pass, every present object has at most
//! `copies` replicas, each on a distinct mountpath, with the HRW-ranked
//! mountpaths preferred. Replicas beyond the count are removed.

use crate::state::TargetState;
use std::sync::Arc;
use strata_common::{Bck, ObjName, Result};
use strata_fs::content::fqn;
use strata_fs::walk::WalkBckOptions;
use strata_fs::{ContentType, Mountpath};
use tracing::warn;
use xxhash_rust::xxh64::xxh64;

/// Rank the target's mountpaths for one uname, best first
fn rank_mountpaths(mpaths: &[Arc<Mountpath>], uname: &str) -> Vec<Arc<Mountpath>> {
    let key = xxh64(uname.as_bytes(), 0);
    let mut scored: Vec<(Arc<Mountpath>, u64)> = mpaths
        .iter()
        .map(|m| {
            let s = m.path().to_string_lossy();
            (Arc::clone(m), xxh64(s.as_bytes(), key))
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(m, _)| m).collect()
}

/// One mirroring pass over the bucket. Returns the number of replicas
/// written.
pub fn mirror_bucket(state: &Arc<TargetState>, bck: &Bck, copies: i64) -> Result<u64> {
    let copies = copies.max(1) as usize;
    let avail = state.mpaths.available();
    let mut written = 0u64;

    let opts = WalkBckOptions {
        bck: bck.clone(),
        ct: ContentType::Obj,
        is_aborted: None,
    };
    strata_fs::walk_bck(&state.mpaths, &opts, &mut |entry| {
        let obj = ObjName::new_unchecked(entry.name.clone());
        let uname = bck.make_uname(&obj);
        let ranked = rank_mountpaths(&avail, &uname);
        let want = &ranked[..copies.min(ranked.len())];

        // replicate onto wanted mountpaths that lack the object
        for mpath in want {
            let dst = fqn(mpath.path(), bck, ContentType::Obj, &obj);
            if dst == entry.fqn || dst.is_file() {
                continue;
            }
            if let Some(dir) = dst.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    warn!(obj = %uname, %e, "mirror mkdir failed");
                    continue;
                }
            }
            match std::fs::copy(&entry.fqn, &dst) {
                Ok(_) => {
                    written += 1;
                    // the sidecar travels with the payload
                    let src_meta = fqn(ranked[0].path(), bck, ContentType::ObjMeta, &obj);
                    let dst_meta = fqn(mpath.path(), bck, ContentType::ObjMeta, &obj);
                    if src_meta.is_file() {
                        if let Some(dir) = dst_meta.parent() {
                            let _ = std::fs::create_dir_all(dir);
                        }
                        let _ = std::fs::copy(&src_meta, &dst_meta);
                    }
                }
                Err(e) => warn!(obj = %uname, %e, "mirror copy failed"),
            }
        }

        // drop replicas beyond the wanted set
        for mpath in ranked.iter().skip(copies) {
            let extra = fqn(mpath.path(), bck, ContentType::Obj, &obj);
            if extra.is_file() {
                let _ = std::fs::remove_file(&extra);
                let extra_meta = fqn(mpath.path(), bck, ContentType::ObjMeta, &obj);
                let _ = std::fs::remove_file(extra_meta);
            }
        }
        Ok(())
    })?;
    Ok(written)
}
