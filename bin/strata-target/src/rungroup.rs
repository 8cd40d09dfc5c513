//! Mountpath run-group
//!
//! Mountpath changes are fanned out to every registered runner (EC joggers
//! and friends), trigger a local rebalance, and flip the target's cluster
//! membership at the zero-mountpath boundary: losing the last mountpath
//! deregisters the target rather than letting it starve silently; gaining
//! the first one re-registers it.
//!
//! Fan-out is best-effort. Runners are independent; a failing runner is
//! logged, never propagated, because mountpath changes must converge.

use crate::state::TargetState;
use std::path::Path;
use std::sync::Arc;
use strata_common::Result;
use tracing::{error, info, warn};

/// Add a mountpath: create canonical directories, notify runners, resilver
pub async fn add_mountpath(state: &Arc<TargetState>, mpath: &Path) -> Result<()> {
    std::fs::create_dir_all(mpath)?;
    let added = state.mpaths.add(mpath)?;
    state.mpaths.create_provider_dirs(&added)?;
    // existing buckets get their canonical directories on the new mountpath
    let bmd = state.bmd.get();
    for (provider, buckets) in &bmd.providers {
        for name in buckets.keys() {
            let bck = strata_common::Bck::new(*provider, name.clone());
            if let Err(e) = state.mpaths.create_bucket_dirs(&bck) {
                warn!(%bck, %e, "failed to create bucket dirs on new mountpath");
            }
        }
    }

    for runner in state.runners.lock().iter() {
        runner.req_add(mpath);
    }
    state.start_resilver();
    check_enable(state, "added", mpath).await;
    Ok(())
}

/// Remove a mountpath: reverse of add
pub async fn remove_mountpath(state: &Arc<TargetState>, mpath: &Path) -> Result<()> {
    state.mpaths.remove(mpath)?;
    for runner in state.runners.lock().iter() {
        runner.req_remove(mpath);
    }
    if !check_disable(state, "removed").await {
        state.start_resilver();
    }
    Ok(())
}

/// Enable a mountpath; a no-op unless the state actually flipped
pub async fn enable_mountpath(state: &Arc<TargetState>, mpath: &Path) -> Result<()> {
    if !state.mpaths.enable(mpath)? {
        return Ok(());
    }
    for runner in state.runners.lock().iter() {
        runner.req_enable(mpath);
    }
    state.start_resilver();
    check_enable(state, "enabled", mpath).await;
    Ok(())
}

/// Disable a mountpath; a no-op unless the state actually flipped
pub async fn disable_mountpath(state: &Arc<TargetState>, mpath: &Path) -> Result<()> {
    if !state.mpaths.disable(mpath)? {
        return Ok(());
    }
    for runner in state.runners.lock().iter() {
        runner.req_disable(mpath);
    }
    if !check_disable(state, "disabled").await {
        state.start_resilver();
    }
    Ok(())
}

/// With zero usable mountpaths the target drops out of the cluster map.
/// Returns true when that happened.
async fn check_disable(state: &Arc<TargetState>, action: &str) -> bool {
    if !state.mpaths.available().is_empty() {
        return false;
    }
    match state.deregister().await {
        Ok(()) => error!("{action} the last available mountpath; deregistered self"),
        Err(e) => error!(%e, "{action} the last available mountpath, and deregistration failed"),
    }
    true
}

/// Crossing back over the zero-mountpath boundary re-registers the target
async fn check_enable(state: &Arc<TargetState>, action: &str, mpath: &Path) {
    let avail = state.mpaths.available();
    if avail.len() > 1 {
        info!(mpath = %mpath.display(), "{action} mountpath");
        return;
    }
    info!(mpath = %mpath.display(), "{action} the first usable mountpath");
    if let Err(e) = state.join_cluster().await {
        warn!(%e, "failed to re-register self");
    }
}
