//! Target side of the two-phase bucket transaction protocol
//!
//! Begin records intent and validates local preconditions; commit applies the
//! operation and, when it has a long-running follow-up, spawns the work and
//! reports completion to the primary's notification listener. Begin is
//! idempotent per uuid; abort after commit is a no-op.

use crate::state::TargetState;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_common::{Action, ActionMsg, Bck, Error, ObjName, Result};
use strata_fs::ContentType;
use tracing::{debug, info, warn};

/// A transaction the target has accepted but not yet resolved
#[derive(Clone, Debug)]
struct PendingTxn {
    action: Action,
    bck: Bck,
    msg: ActionMsg,
}

/// Table of pending and recently committed transactions
pub struct TxnTable {
    pending: Mutex<HashMap<String, PendingTxn>>,
    committed: Mutex<HashSet<String>>,
}

impl TxnTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            committed: Mutex::new(HashSet::new()),
        }
    }
}

/// Begin: validate and record. A repeated begin with a known uuid is a no-op.
pub fn begin(state: &TargetState, bck: Bck, msg: ActionMsg) -> Result<()> {
    if msg.uuid.is_empty() {
        return Err(Error::invalid_argument("txn uuid missing"));
    }
    {
        let pending = state.txns.pending.lock();
        if pending.contains_key(&msg.uuid) {
            debug!(uuid = %msg.uuid, "repeated begin; ignoring");
            return Ok(());
        }
    }

    // local preconditions
    match msg.action {
        Action::CreateBucket | Action::CopyBucket | Action::RenameBucket => {
            if state.mpaths.available().is_empty() {
                return Err(Error::NoMountpaths);
            }
        }
        Action::MakeNCopies => {
            let copies = parse_copies(&msg)?;
            let mpath_cnt = state.mpaths.available().len();
            if copies as usize > mpath_cnt {
                return Err(Error::invalid_argument(format!(
                    "{copies} copies exceed {mpath_cnt} mountpaths"
                )));
            }
        }
        Action::EcEncode => {
            let (data, parity) = parse_ec_slices(&msg)?;
            let have = state.smap.get().count_targets();
            let need = data + parity + 1;
            if have < need {
                return Err(Error::InsufficientTargets {
                    available: have,
                    required: need,
                });
            }
        }
        _ => {}
    }

    state.txns.pending.lock().insert(
        msg.uuid.clone(),
        PendingTxn {
            action: msg.action,
            bck,
            msg,
        },
    );
    Ok(())
}

/// Abort: drop the pending record. Unknown uuids (including already-committed
/// ones) are ignored; aborts are honored in begin phase only.
pub fn abort(state: &TargetState, uuid: &str) {
    if state.txns.pending.lock().remove(uuid).is_some() {
        info!(uuid, "txn aborted");
    } else {
        debug!(uuid, "abort for unknown or committed txn; ignoring");
    }
}

/// Commit: apply the operation. A replayed commit for an already-committed
/// uuid succeeds without redoing the work.
pub fn commit(state: &Arc<TargetState>, uuid: &str) -> Result<()> {
    if state.txns.committed.lock().contains(uuid) {
        debug!(uuid, "repeated commit; ignoring");
        return Ok(());
    }
    let Some(txn) = state.txns.pending.lock().remove(uuid) else {
        return Err(Error::TxnNotFound(uuid.to_string()));
    };
    state.txns.committed.lock().insert(uuid.to_string());

    info!(uuid, action = %txn.action, bck = %txn.bck, "committing txn");
    match txn.action {
        Action::CreateBucket => {
            state.mpaths.create_bucket_dirs(&txn.bck)?;
        }
        Action::MakeNCopies => {
            let copies = parse_copies(&txn.msg)?;
            spawn_mirror(state, txn.bck, copies, uuid.to_string());
        }
        Action::SetBucketProps | Action::ResetBucketProps => {
            // the metasynced BMD already carries the new props; run the
            // follow-up work they imply
            let props = state.bucket_props(&txn.bck)?;
            if props.mirror.enabled {
                spawn_mirror(state, txn.bck.clone(), props.mirror.copies, uuid.to_string());
            } else if props.ec.enabled {
                spawn_bucket_encode(state, txn.bck, uuid.to_string());
            }
        }
        Action::EcEncode => {
            spawn_bucket_encode(state, txn.bck, uuid.to_string());
        }
        Action::RenameBucket => {
            let to = parse_dest(&txn.msg)?;
            rename_local(state, &txn.bck, &to)?;
            state.start_resilver();
            let st = Arc::clone(state);
            let uuid = uuid.to_string();
            tokio::spawn(async move {
                st.post_notif(&uuid, None).await;
            });
        }
        Action::CopyBucket => {
            let to = parse_dest(&txn.msg)?;
            spawn_bucket_copy(state, txn.bck, to, uuid.to_string());
        }
        action => {
            warn!(uuid, %action, "no target-side commit work");
        }
    }
    Ok(())
}

fn parse_copies(msg: &ActionMsg) -> Result<i64> {
    let copies = msg
        .value
        .as_ref()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::invalid_argument("copies value missing"))?;
    if copies < 1 {
        return Err(Error::invalid_argument("copies must be positive"));
    }
    Ok(copies)
}

fn parse_ec_slices(msg: &ActionMsg) -> Result<(usize, usize)> {
    let v = msg
        .value
        .as_ref()
        .ok_or_else(|| Error::invalid_argument("ec config missing"))?;
    let data = v.get("data_slices").and_then(|x| x.as_u64()).unwrap_or(0) as usize;
    let parity = v.get("parity_slices").and_then(|x| x.as_u64()).unwrap_or(0) as usize;
    if data < 1 || parity < 1 {
        return Err(Error::invalid_argument("invalid number of slices"));
    }
    Ok((data, parity))
}

fn parse_dest(msg: &ActionMsg) -> Result<Bck> {
    let v = msg
        .value
        .as_ref()
        .ok_or_else(|| Error::invalid_argument("destination bucket missing"))?;
    serde_json::from_value(v.clone()).map_err(Error::from)
}

/// Rename this target's slice of the bucket: move the on-disk directories
fn rename_local(state: &TargetState, from: &Bck, to: &Bck) -> Result<()> {
    for mpath in state.mpaths.available() {
        let src = mpath.bucket_dir(from);
        let dst = mpath.bucket_dir(to);
        if !src.exists() {
            continue;
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&src, &dst)?;
    }
    Ok(())
}

/// Mirror the bucket up to `copies` replicas across distinct mountpaths,
/// then report to the primary's listener
fn spawn_mirror(state: &Arc<TargetState>, bck: Bck, copies: i64, uuid: String) {
    let st = Arc::clone(state);
    tokio::spawn(async move {
        let res = tokio::task::spawn_blocking({
            let st = Arc::clone(&st);
            let bck = bck.clone();
            move || crate::mirror::mirror_bucket(&st, &bck, copies)
        })
        .await
        .unwrap_or_else(|e| Err(Error::internal(format!("mirror task: {e}"))));
        match &res {
            Ok(n) => info!(%bck, copies, mirrored = n, "mirroring finished"),
            Err(e) => warn!(%bck, %e, "mirroring failed"),
        }
        st.post_notif(&uuid, res.err().map(|e| e.to_string())).await;
    });
}

/// Encode every object this target owns in the bucket, then report
fn spawn_bucket_encode(state: &Arc<TargetState>, bck: Bck, uuid: String) {
    let st = Arc::clone(state);
    tokio::spawn(async move {
        let err = bucket_encode(&st, &bck).await.err();
        if let Some(e) = &err {
            warn!(%bck, %e, "bucket encode failed");
        } else {
            info!(%bck, "bucket encode finished");
        }
        st.post_notif(&uuid, err.map(|e| e.to_string())).await;
    });
}

async fn bucket_encode(state: &Arc<TargetState>, bck: &Bck) -> Result<()> {
    let names = owned_objects(state, bck).await?;
    for name in names {
        let lom = state.lom(bck.clone(), ObjName::new_unchecked(name))?;
        if let Err(e) = state.xput.encode_background(lom).await {
            warn!(%bck, %e, "failed to queue encode");
        }
    }
    Ok(())
}

/// Copy this target's objects into the destination bucket via the owning
/// targets' object endpoints, then report
fn spawn_bucket_copy(state: &Arc<TargetState>, from: Bck, to: Bck, uuid: String) {
    let st = Arc::clone(state);
    tokio::spawn(async move {
        let err = bucket_copy(&st, &from, &to).await.err();
        if let Some(e) = &err {
            warn!(%from, %to, %e, "bucket copy failed");
        } else {
            info!(%from, %to, "bucket copy finished");
        }
        st.post_notif(&uuid, err.map(|e| e.to_string())).await;
    });
}

async fn bucket_copy(state: &Arc<TargetState>, from: &Bck, to: &Bck) -> Result<()> {
    let names = owned_objects(state, from).await?;
    let smap = state.smap.get();
    let timeout = state.config.timeout.long_timeout;
    for name in names {
        let mut src = state.lom(from.clone(), ObjName::new_unchecked(name.clone()))?;
        if !src.load()? {
            continue;
        }
        let payload = src.load_payload()?;
        let uname = to.make_uname(src.objname());
        let dst_tgt = smap.hrw_target(&uname)?;
        let path = format!("v1/objects/{}/{}", to.uid(), name);
        state
            .client
            .put_bytes(
                &dst_tgt.data_url(&path),
                bytes::Bytes::from(payload),
                &[],
                timeout,
            )
            .await?;
    }
    Ok(())
}

/// Names of the objects this target's mountpaths hold for `bck`
async fn owned_objects(state: &Arc<TargetState>, bck: &Bck) -> Result<Vec<String>> {
    let mpaths = Arc::clone(&state.mpaths);
    let bck = bck.clone();
    tokio::task::spawn_blocking(move || {
        let mut names = Vec::new();
        let opts = strata_fs::walk::WalkBckOptions {
            bck,
            ct: ContentType::Obj,
            is_aborted: None,
        };
        strata_fs::walk_bck(&mpaths, &opts, &mut |entry| {
            names.push(entry.name.clone());
            Ok(())
        })?;
        Ok(names)
    })
    .await
    .map_err(|e| Error::internal(format!("walk task: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_cluster::Snode;
    use strata_common::{BucketName, NodeRole};

    async fn mk_state() -> (Vec<tempfile::TempDir>, Arc<TargetState>) {
        let mpath_dir = tempfile::TempDir::new().unwrap();
        let data_dir = tempfile::TempDir::new().unwrap();
        let snode = Snode::new("t1", NodeRole::Target, "http://127.0.0.1:8081");
        let state = TargetState::new(
            snode,
            vec![mpath_dir.path().display().to_string()],
            data_dir.path().to_path_buf(),
            "http://127.0.0.1:8080".to_string(),
            Arc::new(strata_common::config::Config::default()),
        )
        .unwrap();
        (vec![mpath_dir, data_dir], Arc::new(state))
    }

    fn create_msg(uuid: &str) -> ActionMsg {
        let mut msg = ActionMsg::new(Action::CreateBucket);
        msg.uuid = uuid.to_string();
        msg
    }

    fn bck(name: &str) -> Bck {
        Bck::strata(BucketName::new_unchecked(name))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn begin_is_idempotent_per_uuid() {
        let (_dirs, state) = mk_state().await;
        begin(&state, bck("b1"), create_msg("tx-1")).unwrap();
        // a retried begin with the same uuid is accepted without extra state
        begin(&state, bck("b1"), create_msg("tx-1")).unwrap();
        assert_eq!(state.txns.pending.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_then_abort_is_a_noop() {
        let (_dirs, state) = mk_state().await;
        begin(&state, bck("b1"), create_msg("tx-2")).unwrap();
        commit(&state, "tx-2").unwrap();

        // abort after commit has no effect
        abort(&state, "tx-2");
        assert!(state.txns.committed.lock().contains("tx-2"));

        // a replayed commit succeeds without redoing the work
        commit(&state, "tx-2").unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_of_unknown_txn_fails() {
        let (_dirs, state) = mk_state().await;
        assert!(matches!(
            commit(&state, "never-begun"),
            Err(Error::TxnNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn aborted_txn_cannot_commit() {
        let (_dirs, state) = mk_state().await;
        begin(&state, bck("b1"), create_msg("tx-3")).unwrap();
        abort(&state, "tx-3");
        assert!(matches!(
            commit(&state, "tx-3"),
            Err(Error::TxnNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn begin_validates_missing_uuid_and_bad_values() {
        let (_dirs, state) = mk_state().await;
        let msg = ActionMsg::new(Action::CreateBucket);
        assert!(begin(&state, bck("b1"), msg).is_err());

        let mut msg = ActionMsg::new(Action::EcEncode);
        msg.uuid = "tx-4".to_string();
        msg.value = Some(serde_json::json!({"data_slices": 0, "parity_slices": 1}));
        assert!(begin(&state, bck("b1"), msg).is_err());
    }
}
