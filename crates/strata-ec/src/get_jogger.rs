//! Get jogger: per-mountpath restore worker
//!
//! Restores run concurrently up to a configured limit per mountpath. A
//! restore first collects slice metadata from every peer, picks the
//! plurality checksum as canonical, then either probes replica holders in
//! turn (small objects) or fans in the surviving slices and reconstructs.
//! Whatever was rebuilt is re-uploaded to targets that lost theirs, in the
//! background, after the client already has its object.

use crate::encode::reconstruct;
use crate::metadata::SliceMeta;
use crate::peer;
use crate::{EcAction, EcCtx, EcRequest, ECMD_HEADER};
use bytes::Bytes;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use strata_cluster::{Lom, Snode};
use strata_common::{Error, NodeId, Result};
use strata_xaction::XactDemandBase;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) struct GetJogger {
    pub ctx: Arc<EcCtx>,
    pub demand: Arc<XactDemandBase>,
    pub mpath: std::path::PathBuf,
    pub sema: Arc<Semaphore>,
}

impl GetJogger {
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<EcRequest>,
        stop: CancellationToken,
    ) {
        info!(mpath = %self.mpath.display(), "started EC get jogger");
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    info!(mpath = %self.mpath.display(), "stopping EC get jogger");
                    return;
                }
                req = rx.recv() => {
                    let Some(mut req) = req else { return };
                    if req.action != EcAction::Restore {
                        self.demand.dec_pending();
                        if let Some(tx) = req.done_tx.take() {
                            let _ = tx.send(Err(Error::invalid_argument(
                                "get jogger handles restore only",
                            )));
                        }
                        continue;
                    }
                    let permit = Arc::clone(&self.sema)
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    let jogger = Arc::clone(&self);
                    tokio::spawn(async move {
                        let res = jogger.restore(&mut req.lom).await;
                        if let Err(e) = &res {
                            jogger.demand.base().failures_inc();
                            error!(obj = %req.lom.uname(), %e, "restore failed");
                        }
                        jogger.demand.dec_pending();
                        if let Some(tx) = req.done_tx.take() {
                            let _ = tx.send(res);
                        }
                        drop(permit);
                    });
                }
            }
        }
    }

    /// Entry point: restore the main object from replicas or slices
    async fn restore(&self, lom: &mut Lom) -> Result<()> {
        let props = self
            .ctx
            .bmd
            .get()
            .get(lom.bck())
            .cloned()
            .ok_or_else(|| Error::BucketDoesNotExist(lom.bck().clone()))?;
        if !props.ec.enabled {
            return Err(Error::EcDisabled(lom.bck().clone()));
        }

        let (meta, nodes) = self.request_meta(lom).await?;
        debug!(obj = %lom.uname(), holders = nodes.len(), is_copy = meta.is_copy, "canonical metadata selected");

        if meta.is_copy {
            return self.restore_replicated(lom, &meta, &nodes, props.cksum).await;
        }
        if nodes.len() < meta.data {
            return Err(Error::SlicesInsufficient {
                found: nodes.len(),
                need: meta.data,
            });
        }
        self.restore_encoded(lom, &meta, &nodes, props.cksum).await
    }

    /// Broadcast a metadata request; group replies by object checksum and
    /// keep the plurality set, discarding dissenters
    async fn request_meta(&self, lom: &Lom) -> Result<(SliceMeta, HashMap<NodeId, SliceMeta>)> {
        let smap = self.ctx.smap.get();
        let self_id = &self.ctx.client.self_node().id;
        let timeout = self.ctx.config.timeout.send_file;
        let path = EcCtx::ec_path("meta", lom);

        let reqs = smap
            .tmap
            .values()
            .filter(|t| t.id != *self_id)
            .map(|tgt| {
                let url = tgt.data_url(&path);
                async move {
                    match self.ctx.client.get_bytes(&url, timeout).await {
                        Ok((200, body)) if !body.is_empty() => {
                            match serde_json::from_slice::<SliceMeta>(&body) {
                                Ok(md) => Some((tgt.id.clone(), md)),
                                Err(e) => {
                                    warn!(node = %tgt.id, %e, "bad metafile reply");
                                    None
                                }
                            }
                        }
                        Ok(_) => None,
                        Err(e) => {
                            debug!(node = %tgt.id, %e, "metafile request failed");
                            None
                        }
                    }
                }
            });
        let replies: Vec<(NodeId, SliceMeta)> =
            join_all(reqs).await.into_iter().flatten().collect();

        // plurality vote over the object checksum
        let mut counts: HashMap<String, usize> = HashMap::new();
        for (_, md) in &replies {
            let key = md
                .obj_cksum
                .as_ref()
                .map(|c| c.value.clone())
                .unwrap_or_default();
            *counts.entry(key).or_default() += 1;
        }
        let Some((canonical_key, _)) = counts.into_iter().max_by_key(|(_, n)| *n) else {
            return Err(Error::NoMetafile {
                bucket: lom.bck().to_string(),
                object: lom.objname().to_string(),
            });
        };

        let mut canonical: Option<SliceMeta> = None;
        let mut nodes = HashMap::new();
        for (node, md) in replies {
            let key = md
                .obj_cksum
                .as_ref()
                .map(|c| c.value.clone())
                .unwrap_or_default();
            if key == canonical_key {
                canonical.get_or_insert_with(|| md.clone());
                nodes.insert(node, md);
            } else {
                warn!(
                    %node,
                    slice_id = md.slice_id,
                    "discarding dissenting metafile"
                );
            }
        }
        let meta = canonical.expect("plurality set is non-empty");
        Ok((meta, nodes))
    }

    /// Probe the replica holders one at a time; persist the first hit and
    /// push the replica back to any HRW target missing it
    async fn restore_replicated(
        &self,
        lom: &mut Lom,
        meta: &SliceMeta,
        nodes: &HashMap<NodeId, SliceMeta>,
        cksum_ty: strata_common::ChecksumType,
    ) -> Result<()> {
        let smap = self.ctx.smap.get();
        let timeout = self.ctx.config.timeout.send_file;
        let path = EcCtx::ec_path("replica", lom);

        let mut payload: Option<Bytes> = None;
        for node in nodes.keys() {
            let Some(tgt) = smap.get_target(node) else {
                continue;
            };
            match self.ctx.client.get_bytes(&tgt.data_url(&path), timeout).await {
                Ok((200, body)) if !body.is_empty() => {
                    payload = Some(body);
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!(%node, %e, "replica probe failed"),
            }
        }
        let payload =
            payload.ok_or_else(|| Error::internal("failed to read a replica from any target"))?;

        peer::store_replica(lom, meta, &payload, cksum_ty)?;
        self.demand.base().objs_inc();
        self.demand.base().bytes_add(payload.len() as i64);

        // client can read the object now; repair the replica set behind it
        self.spawn_replica_repair(lom.clone(), meta.clone(), nodes.keys().cloned().collect(), payload);
        Ok(())
    }

    fn spawn_replica_repair(
        &self,
        lom: Lom,
        meta: SliceMeta,
        holders: Vec<NodeId>,
        payload: Bytes,
    ) {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let smap = ctx.smap.get();
            let uname = lom.uname();
            let Ok(targets) = smap.hrw_target_list(&uname, meta.parity + 1) else {
                return;
            };
            let self_id = &ctx.client.self_node().id;
            let md = match serde_json::to_string(&meta.for_slice(0)) {
                Ok(md) => md,
                Err(_) => return,
            };
            let timeout = ctx.config.timeout.send_file;
            let path = EcCtx::ec_path("replica", &lom);
            for tgt in targets {
                if tgt.id == *self_id || holders.contains(&tgt.id) {
                    continue;
                }
                if let Err(e) = ctx
                    .client
                    .put_bytes(
                        &tgt.data_url(&path),
                        payload.clone(),
                        &[(ECMD_HEADER, md.clone())],
                        timeout,
                    )
                    .await
                {
                    warn!(obj = %uname, node = %tgt.id, %e, "replica repair failed");
                }
            }
        });
    }

    /// Fan in the surviving slices, reconstruct, persist the main object,
    /// then re-upload rebuilt slices to targets that lack one
    async fn restore_encoded(
        &self,
        lom: &mut Lom,
        meta: &SliceMeta,
        nodes: &HashMap<NodeId, SliceMeta>,
        cksum_ty: strata_common::ChecksumType,
    ) -> Result<()> {
        let smap = self.ctx.smap.get();
        let timeout = self.ctx.config.timeout.send_file;
        let total = meta.slice_cnt();
        let path = EcCtx::ec_path("slice", lom);

        // which node holds which slice
        let mut id_to_node: HashMap<usize, NodeId> = HashMap::new();
        for (node, md) in nodes {
            if md.slice_id < 1 || md.slice_id > total {
                warn!(%node, slice_id = md.slice_id, "invalid slice id");
                continue;
            }
            id_to_node.insert(md.slice_id, node.clone());
        }

        let fetches = id_to_node.iter().map(|(slice_id, node)| {
            let tgt = smap.get_target(node).cloned();
            let url = tgt.as_ref().map(|t| t.data_url(&path));
            let slice_id = *slice_id;
            let node = node.clone();
            async move {
                let Some(url) = url else { return (slice_id, None) };
                match self.ctx.client.get_bytes(&url, timeout).await {
                    Ok((200, body)) if !body.is_empty() => (slice_id, Some(body)),
                    Ok(_) => (slice_id, None),
                    Err(e) => {
                        warn!(%node, slice_id, %e, "slice fetch failed");
                        (slice_id, None)
                    }
                }
            }
        });

        let mut present: Vec<Option<Bytes>> = vec![None; total];
        for (slice_id, body) in join_all(fetches).await {
            present[slice_id - 1] = body;
        }

        let (payload, all_slices) = reconstruct(meta, present)?;

        // byte-identical or nothing: verify against the recorded checksum
        if let Some(obj_cksum) = &meta.obj_cksum {
            if !obj_cksum.verify(&payload) {
                return Err(Error::ChecksumMismatch {
                    expected: obj_cksum.to_string(),
                    actual: strata_common::Checksum::compute(obj_cksum.ty, &payload).to_string(),
                });
            }
        }

        lom.save_payload(&payload, cksum_ty, false)?;
        meta.for_slice(0).store(&lom.ec_meta_fqn())?;
        self.demand.base().objs_inc();
        self.demand.base().bytes_add(payload.len() as i64);
        debug!(obj = %lom.uname(), size = payload.len(), "main object reconstructed");

        // client is served; repair the slice set in the background
        self.spawn_slice_repair(lom.clone(), meta.clone(), id_to_node, all_slices);
        Ok(())
    }

    fn spawn_slice_repair(
        &self,
        lom: Lom,
        meta: SliceMeta,
        id_to_node: HashMap<usize, NodeId>,
        all_slices: Vec<Bytes>,
    ) {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let smap = ctx.smap.get();
            let uname = lom.uname();
            let total = meta.slice_cnt();
            let Ok(targets) = smap.hrw_target_list(&uname, total + 1) else {
                return;
            };
            let targets: Vec<Snode> = targets.into_iter().cloned().collect();
            let self_id = ctx.client.self_node().id.clone();
            let holders: Vec<&NodeId> = id_to_node.values().collect();
            let missing_ids: Vec<usize> =
                (1..=total).filter(|id| !id_to_node.contains_key(id)).collect();

            let empty_targets = targets
                .iter()
                .skip(1)
                .filter(|t| t.id != self_id && !holders.contains(&&t.id));

            let timeout = ctx.config.timeout.send_file;
            let path = EcCtx::ec_path("slice", &lom);
            for (tgt, slice_id) in empty_targets.zip(missing_ids) {
                let md = meta.for_slice(slice_id);
                let body = all_slices[slice_id - 1].clone();
                let md_json = match serde_json::to_string(&md) {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                match ctx
                    .client
                    .put_bytes(
                        &tgt.data_url(&path),
                        body,
                        &[(ECMD_HEADER, md_json)],
                        timeout,
                    )
                    .await
                {
                    Ok(()) => debug!(obj = %uname, slice_id, node = %tgt.id, "re-uploaded slice"),
                    Err(e) => warn!(obj = %uname, slice_id, node = %tgt.id, %e, "slice re-upload failed"),
                }
            }
        });
    }
}
