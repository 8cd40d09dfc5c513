//! Proxy side of the two-phase bucket transaction protocol
//!
//! Every structural bucket mutation executes, with minor variations, the
//! same steps: check the precondition under the bucket name-lock, broadcast
//! begin to all targets (aborting on the first failure), mutate the BMD
//! under its owner's lock, metasync the new version and wait for the
//! fan-out, then broadcast commit. Commit must go through; when it does not,
//! the operation's compensating rollback runs and the error is surfaced.
//! Long-running follow-ups park the name-lock with a notification listener
//! keyed by the txn uuid.

use crate::state::ProxyState;
use std::sync::Arc;
use std::time::Duration;
use strata_cluster::broadcast::first_err;
use strata_cluster::metasync::MetasyncBody;
use strata_cluster::namelock::NameWriteGuard;
use strata_cluster::{Smap, Snode};
use strata_common::msg::{headers, txn_phase};
use strata_common::{
    Action, ActionMsg, Bck, BucketProps, BucketPropsToUpdate, Error, Result,
};
use tracing::{error, info, warn};

/// Client-side context of one transaction
pub struct TxnClientCtx {
    pub uuid: String,
    pub smap: Arc<Smap>,
    pub msg: ActionMsg,
    pub path: String,
    pub timeout: Duration,
}

impl TxnClientCtx {
    fn phase_path(&self, phase: &str) -> String {
        format!("{}/{}", self.path, phase)
    }

    fn targets(&self) -> Vec<Snode> {
        self.smap.tmap.values().cloned().collect()
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![(
            headers::TXN_TIMEOUT,
            (self.timeout.as_nanos() as u64).to_string(),
        )]
    }
}

/// Gather the transaction context: uuid, Smap snapshot, marshaled message
fn prep_txn_client(
    state: &ProxyState,
    action: Action,
    bck: &Bck,
    value: Option<serde_json::Value>,
) -> Result<TxnClientCtx> {
    let smap = state.smap.get();
    if smap.count_targets() == 0 {
        return Err(Error::NoTargets);
    }
    let uuid = uuid::Uuid::new_v4().to_string();
    let mut msg = ActionMsg::new(action);
    msg.uuid = uuid.clone();
    msg.value = value;
    Ok(TxnClientCtx {
        uuid,
        smap,
        msg,
        path: format!("v1/txn/{}", bck.name),
        timeout: state.config.timeout.cplane_operation,
    })
}

/// Broadcast begin; on any failure broadcast abort and return the error
async fn begin_or_abort(state: &ProxyState, c: &TxnClientCtx) -> Result<()> {
    let results = state
        .client
        .bcast_post(
            &c.targets(),
            &c.phase_path(txn_phase::BEGIN),
            &c.query(),
            &c.msg,
            c.timeout,
        )
        .await;
    if let Some((node, err)) = first_err(results) {
        let _ = state
            .client
            .bcast_post(
                &c.targets(),
                &c.phase_path(txn_phase::ABORT),
                &c.query(),
                &c.msg,
                c.timeout,
            )
            .await;
        warn!(uuid = %c.uuid, %node, %err, "begin failed; aborted");
        return Err(err);
    }
    Ok(())
}

/// Broadcast commit with `timeout`; returns the first failure
async fn commit(
    state: &ProxyState,
    c: &TxnClientCtx,
    timeout: Duration,
    extra_query: &[(&'static str, String)],
) -> Result<()> {
    let mut query = c.query();
    query.extend_from_slice(extra_query);
    let results = state
        .client
        .bcast_post(
            &c.targets(),
            &c.phase_path(txn_phase::COMMIT),
            &query,
            &c.msg,
            timeout,
        )
        .await;
    if let Some((node, err)) = first_err(results) {
        error!(uuid = %c.uuid, %node, %err, "commit failed");
        return Err(Error::CommitFailed {
            node: node.to_string(),
            reason: err.to_string(),
        });
    }
    Ok(())
}

/// create-bucket: { check non-existence -- begin -- create locally --
/// metasync -- commit }
pub async fn create_bucket(state: &ProxyState, bck: &Bck, props: Option<BucketProps>) -> Result<()> {
    let props = props.unwrap_or_default();
    let nlp = state.namelocks.pair(&bck.uid());
    let _nlp_guard = nlp.lock().await;

    {
        let _bmd_guard = state.bmd.lock().await;
        if state.bmd.get().exists(bck) {
            return Err(Error::BucketAlreadyExists(bck.clone()));
        }
    }

    let c = prep_txn_client(state, Action::CreateBucket, bck, None)?;
    begin_or_abort(state, &c).await?;

    // lock, clone, apply, publish; metasync before releasing the owner
    let sync = {
        let _bmd_guard = state.bmd.lock().await;
        let mut clone = state.bmd.clone_bmd();
        let added = clone.add(bck, props);
        debug_assert!(added, "existence re-checked under the lock");
        let published = state.bmd.put(clone);
        let mut msg = c.msg.clone();
        msg.bmd_version = published.version;
        state
            .metasyncer
            .sync(MetasyncBody::bmd((*published).clone(), msg))
    };
    sync.wait().await;

    // critical op: commit gets the max-keepalive budget
    let commit_timeout = state.config.timeout.max_keepalive;
    if let Err(e) = commit(state, &c, commit_timeout, &[]).await {
        undo_create_bucket(state, bck).await;
        return Err(e);
    }
    info!(%bck, "bucket created");
    Ok(())
}

/// destroy-bucket (or evict for cloud buckets): no begin/commit; the BMD
/// deletion is metasynced directly and targets clean up on the diff
pub async fn destroy_bucket(state: &ProxyState, bck: &Bck, action: Action) -> Result<()> {
    let nlp = state.namelocks.pair(&bck.uid());
    let _nlp_guard = nlp.lock().await;

    let sync = {
        let _bmd_guard = state.bmd.lock().await;
        if !state.bmd.get().exists(bck) {
            return Err(Error::BucketDoesNotExist(bck.clone()));
        }
        let mut clone = state.bmd.clone_bmd();
        let deleted = clone.del(bck);
        debug_assert!(deleted);
        let published = state.bmd.put(clone);
        let mut msg = ActionMsg::new(action);
        msg.bmd_version = published.version;
        state
            .metasyncer
            .sync(MetasyncBody::bmd((*published).clone(), msg))
    };
    sync.wait().await;
    info!(%bck, %action, "bucket removed from BMD");
    Ok(())
}

/// make-n-copies: { confirm existence -- begin -- update locally --
/// metasync -- listener -- commit }
pub async fn make_n_copies(state: &ProxyState, bck: &Bck, copies: i64) -> Result<()> {
    if copies < 1 {
        return Err(Error::invalid_argument("copies must be positive"));
    }
    let nlp = state.namelocks.pair(&bck.uid());
    let Some(nlp_guard) = nlp.try_lock() else {
        return Err(Error::BucketIsBusy(bck.clone()));
    };

    let old_mirror = {
        let _bmd_guard = state.bmd.lock().await;
        match state.bmd.get().get(bck) {
            Some(props) => props.mirror,
            None => return Err(Error::BucketDoesNotExist(bck.clone())),
        }
    };

    let c = prep_txn_client(state, Action::MakeNCopies, bck, Some(serde_json::json!(copies)))?;
    begin_or_abort(state, &c).await?;

    let sync = {
        let _bmd_guard = state.bmd.lock().await;
        let mut clone = state.bmd.clone_bmd();
        let Some(props) = clone.get(bck) else {
            return Err(Error::BucketDoesNotExist(bck.clone()));
        };
        let mut nprops = props.clone();
        nprops.mirror.enabled = copies > 1;
        nprops.mirror.copies = copies;
        clone.set(bck, nprops);
        let published = state.bmd.put(clone);
        let mut msg = c.msg.clone();
        msg.bmd_version = published.version;
        state
            .metasyncer
            .sync(MetasyncBody::bmd((*published).clone(), msg))
    };
    sync.wait().await;

    // unlock only after every target reports its mirroring pass finished
    add_bck_listener(state, &c, nlp_guard);

    if let Err(e) = commit(state, &c, state.config.timeout.long_timeout, &[]).await {
        state.notifs.abort(&c.uuid);
        undo_update_copies(state, bck, old_mirror).await;
        return Err(e);
    }
    Ok(())
}

/// set-bucket-props / reset-bucket-props
pub async fn set_bucket_props(
    state: &ProxyState,
    bck: &Bck,
    action: Action,
    update: BucketPropsToUpdate,
) -> Result<()> {
    let nlp = state.namelocks.pair(&bck.uid());
    let Some(nlp_guard) = nlp.try_lock() else {
        return Err(Error::BucketIsBusy(bck.clone()));
    };

    let bprops = {
        let _bmd_guard = state.bmd.lock().await;
        state
            .bmd
            .get()
            .get(bck)
            .cloned()
            .ok_or_else(|| Error::BucketDoesNotExist(bck.clone()))?
    };

    // make and validate the complete new props before begin
    let (nprops, remirror, reec) = match action {
        Action::SetBucketProps => make_nprops(state, &bprops, &update)?,
        Action::ResetBucketProps => (BucketProps::default(), false, false),
        _ => return Err(Error::invalid_argument("not a props action")),
    };

    let c = prep_txn_client(
        state,
        action,
        bck,
        Some(serde_json::to_value(&nprops)?),
    )?;
    begin_or_abort(state, &c).await?;

    let sync = {
        let _bmd_guard = state.bmd.lock().await;
        let mut clone = state.bmd.clone_bmd();
        if !clone.set(bck, nprops.clone()) {
            return Err(Error::BucketDoesNotExist(bck.clone()));
        }
        let published = state.bmd.put(clone);
        let mut msg = c.msg.clone();
        msg.bmd_version = published.version;
        state
            .metasyncer
            .sync(MetasyncBody::bmd((*published).clone(), msg))
    };
    sync.wait().await;

    // remirror/re-EC: keep the bucket locked until the targets finish
    if remirror || reec {
        add_bck_listener(state, &c, nlp_guard);
    }

    commit(state, &c, state.config.timeout.long_timeout, &[]).await?;
    Ok(())
}

/// rename-bucket: { confirm existence & non-existence -- begin -- RMD --
/// metasync -- commit -- wait for rebalance, then unlock both names }
pub async fn rename_bucket(state: &ProxyState, bck_from: &Bck, bck_to: &Bck) -> Result<()> {
    if bck_from == bck_to {
        return Err(Error::BucketAlreadyExists(bck_to.clone()));
    }
    let nlp_from = state.namelocks.pair(&bck_from.uid());
    let nlp_to = state.namelocks.pair(&bck_to.uid());
    let Some(from_guard) = nlp_from.try_lock() else {
        return Err(Error::BucketIsBusy(bck_from.clone()));
    };
    let Some(to_guard) = nlp_to.try_lock() else {
        return Err(Error::BucketIsBusy(bck_to.clone()));
    };

    {
        let _bmd_guard = state.bmd.lock().await;
        let bmd = state.bmd.get();
        if !bmd.exists(bck_from) {
            return Err(Error::BucketDoesNotExist(bck_from.clone()));
        }
        if bmd.exists(bck_to) {
            return Err(Error::BucketAlreadyExists(bck_to.clone()));
        }
    }

    let mut c = prep_txn_client(
        state,
        Action::RenameBucket,
        bck_from,
        Some(serde_json::to_value(bck_to)?),
    )?;
    begin_or_abort(state, &c).await?;

    // one BMD publish covers both sides of the rename: the destination is
    // added and the source is marked renamed
    let sync = {
        let _bmd_guard = state.bmd.lock().await;
        let mut clone = state.bmd.clone_bmd();
        let Some(bprops) = clone.get(bck_from).cloned() else {
            return Err(Error::BucketDoesNotExist(bck_from.clone()));
        };
        let added = clone.add(bck_to, bprops.clone());
        debug_assert!(added, "non-existence re-checked under the lock");
        let mut from_props = bprops;
        from_props.renamed = Some(Action::RenameBucket.to_string());
        clone.set(bck_from, from_props);
        let published = state.bmd.put(clone);
        let mut msg = c.msg.clone();
        msg.bmd_version = published.version;
        state
            .metasyncer
            .sync(MetasyncBody::bmd((*published).clone(), msg))
    };
    sync.wait().await;

    // a rename starts a new rebalance epoch with a resilver
    let rmd = state.rmd.modify(|rmd| rmd.resilver = true);
    c.msg.rmd_version = rmd.version;

    // both names stay locked until every target reports finished
    let uuid = c.uuid.clone();
    state.notifs.add(
        &uuid,
        c.smap.tmap.keys().cloned().collect::<Vec<_>>(),
        Box::new(move |uuid, err| {
            log_notif_done("rename-bucket", uuid, err);
            drop(from_guard);
            drop(to_guard);
        }),
    );

    if let Err(e) = commit(state, &c, state.config.timeout.long_timeout, &[]).await {
        state.notifs.abort(&c.uuid);
        return Err(e);
    }

    let rmd_sync = state
        .metasyncer
        .sync(MetasyncBody::rmd((*rmd).clone(), c.msg.clone()));
    rmd_sync.wait().await;
    Ok(())
}

/// copy-bucket: { confirm existence -- begin -- conditional metasync --
/// listener -- commit(txn-event) }
pub async fn copy_bucket(state: &ProxyState, bck_from: &Bck, bck_to: &Bck) -> Result<()> {
    let nlp_from = state.namelocks.pair(&bck_from.uid());
    let nlp_to = state.namelocks.pair(&bck_to.uid());
    let Some(from_guard) = nlp_from.try_rlock() else {
        return Err(Error::BucketIsBusy(bck_from.clone()));
    };
    let Some(to_guard) = nlp_to.try_lock() else {
        return Err(Error::BucketIsBusy(bck_to.clone()));
    };

    {
        let _bmd_guard = state.bmd.lock().await;
        if !state.bmd.get().exists(bck_from) {
            return Err(Error::BucketDoesNotExist(bck_from.clone()));
        }
    }

    let c = prep_txn_client(
        state,
        Action::CopyBucket,
        bck_from,
        Some(serde_json::to_value(bck_to)?),
    )?;
    begin_or_abort(state, &c).await?;

    // the destination is created only if absent, carrying the source props
    let mut event = headers::TXN_EVENT_NONE;
    {
        let _bmd_guard = state.bmd.lock().await;
        let bmd = state.bmd.get();
        if !bmd.exists(bck_to) {
            let mut clone = state.bmd.clone_bmd();
            let bprops = clone
                .get(bck_from)
                .cloned()
                .ok_or_else(|| Error::BucketDoesNotExist(bck_from.clone()))?;
            clone.add(bck_to, bprops);
            let published = state.bmd.put(clone);
            let mut msg = c.msg.clone();
            msg.bmd_version = published.version;
            let sync = state
                .metasyncer
                .sync(MetasyncBody::bmd((*published).clone(), msg));
            drop(_bmd_guard);
            sync.wait().await;
            event = headers::TXN_EVENT_METASYNC;
        }
    }

    let uuid = c.uuid.clone();
    state.notifs.add(
        &uuid,
        c.smap.tmap.keys().cloned().collect::<Vec<_>>(),
        Box::new(move |uuid, err| {
            log_notif_done("copy-bucket", uuid, err);
            drop(to_guard);
            drop(from_guard);
        }),
    );

    if let Err(e) = commit(
        state,
        &c,
        state.config.timeout.long_timeout,
        &[(headers::TXN_EVENT, event.to_string())],
    )
    .await
    {
        state.notifs.abort(&c.uuid);
        return Err(e);
    }
    Ok(())
}

/// ec-encode: { confirm existence & EC off -- begin -- update locally --
/// metasync -- listener -- commit }
pub async fn ec_encode(
    state: &ProxyState,
    bck: &Bck,
    data_slices: usize,
    parity_slices: usize,
) -> Result<()> {
    if data_slices < 1 || parity_slices < 1 {
        return Err(Error::invalid_argument("invalid number of slices"));
    }
    let nlp = state.namelocks.pair(&bck.uid());
    let Some(nlp_guard) = nlp.try_lock() else {
        return Err(Error::BucketIsBusy(bck.clone()));
    };

    {
        let _bmd_guard = state.bmd.lock().await;
        let bmd = state.bmd.get();
        let props = bmd
            .get(bck)
            .ok_or_else(|| Error::BucketDoesNotExist(bck.clone()))?;
        if props.ec.enabled {
            // changing data or parity slice counts on the fly is unsupported
            return Err(Error::EcAlreadyEnabled(bck.clone()));
        }
    }

    let value = serde_json::json!({
        "data_slices": data_slices,
        "parity_slices": parity_slices,
    });
    let c = prep_txn_client(state, Action::EcEncode, bck, Some(value))?;
    begin_or_abort(state, &c).await?;

    let sync = {
        let _bmd_guard = state.bmd.lock().await;
        let mut clone = state.bmd.clone_bmd();
        let Some(props) = clone.get(bck) else {
            return Err(Error::BucketDoesNotExist(bck.clone()));
        };
        let mut nprops = props.clone();
        nprops.ec.enabled = true;
        nprops.ec.data_slices = data_slices;
        nprops.ec.parity_slices = parity_slices;
        clone.set(bck, nprops);
        let published = state.bmd.put(clone);
        let mut msg = c.msg.clone();
        msg.bmd_version = published.version;
        state
            .metasyncer
            .sync(MetasyncBody::bmd((*published).clone(), msg))
    };
    sync.wait().await;

    add_bck_listener(state, &c, nlp_guard);

    if let Err(e) = commit(state, &c, state.config.timeout.cplane_operation, &[]).await {
        state.notifs.abort(&c.uuid);
        return Err(e);
    }
    Ok(())
}

//
// rollback & helpers
//

/// rollback create-bucket
async fn undo_create_bucket(state: &ProxyState, bck: &Bck) {
    let sync = {
        let _bmd_guard = state.bmd.lock().await;
        let mut clone = state.bmd.clone_bmd();
        if !clone.del(bck) {
            // once-in-a-million
            return;
        }
        let published = state.bmd.put(clone);
        let mut msg = ActionMsg::new(Action::DestroyBucket);
        msg.bmd_version = published.version;
        state
            .metasyncer
            .sync(MetasyncBody::bmd((*published).clone(), msg))
    };
    sync.wait().await;
    warn!(%bck, "rolled back create-bucket");
}

/// rollback make-n-copies
async fn undo_update_copies(
    state: &ProxyState,
    bck: &Bck,
    mirror: strata_common::types::MirrorConf,
) {
    let sync = {
        let _bmd_guard = state.bmd.lock().await;
        let mut clone = state.bmd.clone_bmd();
        let Some(props) = clone.get(bck) else {
            // ditto
            return;
        };
        let mut nprops = props.clone();
        nprops.mirror = mirror;
        clone.set(bck, nprops);
        let published = state.bmd.put(clone);
        let mut msg = ActionMsg::new(Action::MakeNCopies);
        msg.bmd_version = published.version;
        state
            .metasyncer
            .sync(MetasyncBody::bmd((*published).clone(), msg))
    };
    sync.wait().await;
    warn!(%bck, "rolled back make-n-copies");
}

/// make and validate the complete new props
pub fn make_nprops(
    state: &ProxyState,
    bprops: &BucketProps,
    update: &BucketPropsToUpdate,
) -> Result<(BucketProps, bool, bool)> {
    let mut nprops = bprops.clone();
    nprops.apply(update);
    let mut remirror = false;
    let mut reec = false;

    if bprops.ec.enabled && nprops.ec.enabled {
        if bprops.ec != nprops.ec {
            return Err(Error::EcImmutable);
        }
    } else if nprops.ec.enabled {
        if nprops.ec.data_slices == 0 {
            nprops.ec.data_slices = 1;
        }
        if nprops.ec.parity_slices == 0 {
            nprops.ec.parity_slices = 1;
        }
        reec = true;
    }

    if !bprops.mirror.enabled && nprops.mirror.enabled {
        if nprops.mirror.copies == 1 {
            nprops.mirror.copies = state.config.mirror.copies.max(2);
        }
        remirror = true;
    } else if nprops.mirror.copies == 1 {
        nprops.mirror.enabled = false;
    }

    let target_cnt = state.smap.get().count_targets();
    nprops.validate(target_cnt)?;
    Ok((nprops, remirror, reec))
}

/// Register a single-bucket listener that releases the write guard when all
/// targets have reported
fn add_bck_listener(state: &ProxyState, c: &TxnClientCtx, guard: NameWriteGuard) {
    let action = c.msg.action;
    state.notifs.add(
        &c.uuid,
        c.smap.tmap.keys().cloned().collect::<Vec<_>>(),
        Box::new(move |uuid, err| {
            log_notif_done(action.as_str(), uuid, err);
            drop(guard);
        }),
    );
}

fn log_notif_done(op: &str, uuid: &str, err: Option<String>) {
    match err {
        Some(e) => error!(op, uuid, %e, "notification: finished with error"),
        None => info!(op, uuid, "notification: all targets finished"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::{BucketName, NodeRole};

    fn mk_state() -> (tempfile::TempDir, ProxyState) {
        let dir = tempfile::TempDir::new().unwrap();
        let snode = strata_cluster::Snode::new("p1", NodeRole::Proxy, "http://127.0.0.1:8080");
        let state = ProxyState::new(
            snode,
            true,
            None,
            dir.path().to_path_buf(),
            Arc::new(strata_common::config::Config::default()),
        )
        .unwrap();
        (dir, state)
    }

    fn bck(name: &str) -> Bck {
        Bck::strata(BucketName::new_unchecked(name))
    }

    #[test]
    fn nprops_mirror_upgrade() {
        let (_dir, state) = mk_state();
        let bprops = BucketProps::default();
        let update = BucketPropsToUpdate {
            mirror_enabled: Some(true),
            mirror_copies: Some(1),
            ..Default::default()
        };
        let (nprops, remirror, reec) = make_nprops(&state, &bprops, &update).unwrap();
        // enabling mirror with copies=1 auto-upgrades to max(cfg, 2)
        assert_eq!(nprops.mirror.copies, 2);
        assert!(nprops.mirror.enabled);
        assert!(remirror);
        assert!(!reec);
    }

    #[test]
    fn nprops_copies_one_disables_mirror() {
        let (_dir, state) = mk_state();
        let mut bprops = BucketProps::default();
        bprops.mirror.enabled = true;
        bprops.mirror.copies = 3;
        let update = BucketPropsToUpdate {
            mirror_copies: Some(1),
            ..Default::default()
        };
        let (nprops, remirror, _) = make_nprops(&state, &bprops, &update).unwrap();
        assert!(!nprops.mirror.enabled);
        assert!(!remirror);
    }

    #[test]
    fn nprops_ec_is_immutable_once_enabled() {
        let (_dir, state) = mk_state();
        let mut bprops = BucketProps::default();
        bprops.ec.enabled = true;
        bprops.ec.data_slices = 2;
        bprops.ec.parity_slices = 1;

        let update = BucketPropsToUpdate {
            ec_data_slices: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            make_nprops(&state, &bprops, &update),
            Err(Error::EcImmutable)
        ));

        // untouched EC section passes through
        let update = BucketPropsToUpdate {
            versioning_enabled: Some(true),
            ..Default::default()
        };
        let (nprops, _, reec) = make_nprops(&state, &bprops, &update).unwrap();
        assert!(nprops.versioning.enabled);
        assert!(!reec);
    }

    #[test]
    fn nprops_enabling_ec_fills_defaults() {
        let (_dir, state) = mk_state();
        let bprops = BucketProps::default();
        let update = BucketPropsToUpdate {
            ec_enabled: Some(true),
            ec_data_slices: Some(0),
            ec_parity_slices: Some(0),
            ..Default::default()
        };
        let (nprops, _, reec) = make_nprops(&state, &bprops, &update).unwrap();
        assert!(reec);
        assert_eq!(nprops.ec.data_slices, 1);
        assert_eq!(nprops.ec.parity_slices, 1);
    }

    #[tokio::test]
    async fn rename_to_same_name_is_already_exists() {
        let (_dir, state) = mk_state();
        let b = bck("b1");
        assert!(matches!(
            rename_bucket(&state, &b, &b).await,
            Err(Error::BucketAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn busy_bucket_fails_fast() {
        let (_dir, state) = mk_state();
        {
            let _g = state.bmd.lock().await;
            let mut clone = state.bmd.clone_bmd();
            clone.add(&bck("b1"), BucketProps::default());
            state.bmd.put(clone);
        }
        // hold the bucket's name-lock the way a running txn would
        let guard = state.namelocks.pair(&bck("b1").uid()).try_lock().unwrap();
        let res = make_n_copies(&state, &bck("b1"), 3).await;
        assert!(matches!(res, Err(Error::BucketIsBusy(_))));
        drop(guard);
    }
}
