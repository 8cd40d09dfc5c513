//! Put jogger: per-mountpath encode/cleanup worker
//!
//! Each mountpath gets one put jogger consuming two queues: client puts on
//! the high-priority channel, bucket-wide encode work on the low-priority
//! one. After [`crate::PUT_BATCH_SIZE`] consecutive high-priority requests
//! the jogger lets one low-priority request through.

use crate::encode::generate_slices;
use crate::metadata::SliceMeta;
use crate::{EcAction, EcCtx, EcRequest, ECMD_HEADER, PUT_BATCH_SIZE};
use futures::future::join_all;
use std::sync::Arc;
use strata_cluster::Lom;
use strata_common::{Error, Result};
use strata_xaction::XactDemandBase;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) struct PutJogger {
    pub ctx: Arc<EcCtx>,
    pub demand: Arc<XactDemandBase>,
    pub mpath: std::path::PathBuf,
}

impl PutJogger {
    pub async fn run(
        self,
        mut put_rx: mpsc::Receiver<EcRequest>,
        mut xact_rx: mpsc::Receiver<EcRequest>,
        stop: CancellationToken,
    ) {
        info!(mpath = %self.mpath.display(), "started EC put jogger");
        let mut puts_done = 0usize;
        loop {
            // drain the high-priority queue first, up to one batch
            while puts_done < PUT_BATCH_SIZE {
                match put_rx.try_recv() {
                    Ok(req) => {
                        self.process(req).await;
                        puts_done += 1;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return,
                }
            }
            puts_done = 0;

            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    info!(mpath = %self.mpath.display(), "stopping EC put jogger");
                    return;
                }
                req = put_rx.recv() => match req {
                    Some(req) => self.process(req).await,
                    None => return,
                },
                req = xact_rx.recv() => match req {
                    Some(req) => self.process(req).await,
                    None => return,
                },
            }
        }
    }

    async fn process(&self, mut req: EcRequest) {
        debug!(obj = %req.lom.uname(), wait_us = req.tm.elapsed().as_micros() as u64, "put jogger picked up request");
        let res = match req.action {
            EcAction::Split => self.encode(&mut req.lom).await,
            EcAction::Delete => self.cleanup(&mut req.lom).await,
            EcAction::Restore => Err(Error::invalid_argument(
                "restore is a get-jogger action",
            )),
        };
        if let Err(e) = &res {
            self.demand.base().failures_inc();
            error!(obj = %req.lom.uname(), action = ?req.action, %e, "EC put jogger failed");
        }
        self.demand.dec_pending();
        if let Some(tx) = req.done_tx.take() {
            let _ = tx.send(res);
        }
    }

    /// Encode one object: persist the slice-0 sidecar, then either replicate
    /// (small objects) or split and fan the slices out.
    async fn encode(&self, lom: &mut Lom) -> Result<()> {
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
        if !lom.load()? {
            return Err(Error::ObjectNotFound {
                bucket: lom.bck().to_string(),
                object: lom.objname().to_string(),
            });
        }

        let is_copy = lom.size() <= props.ec.obj_size_limit;
        let required = props.ec.required_targets(is_copy);
        let smap = self.ctx.smap.get();
        if smap.count_targets() < required {
            return Err(Error::InsufficientTargets {
                available: smap.count_targets(),
                required,
            });
        }

        let meta = SliceMeta {
            size: lom.size(),
            data: props.ec.data_slices,
            parity: props.ec.parity_slices,
            is_copy,
            slice_id: 0,
            obj_cksum: lom.cksum().cloned(),
            slice_cksum: None,
            obj_version: lom.version().map(String::from),
        };
        // the anchor of recovery: persisted before any payload leaves the node
        meta.store(&lom.ec_meta_fqn())?;

        self.demand.base().objs_inc();
        self.demand.base().bytes_add(lom.size() as i64);

        let res = if is_copy {
            self.create_copies(lom, &meta).await
        } else {
            self.send_slices(lom, &meta, &props).await
        };
        if res.is_err() {
            // roll the partial encode back everywhere
            let _ = self.cleanup(lom).await;
        }
        res
    }

    /// Replicate a small object to `parity` other targets picked by HRW
    async fn create_copies(&self, lom: &Lom, meta: &SliceMeta) -> Result<()> {
        let smap = self.ctx.smap.get();
        let uname = lom.uname();
        let targets = smap.hrw_target_list(&uname, meta.parity + 1)?;
        let self_id = &self.ctx.client.self_node().id;
        let payload = bytes::Bytes::from(lom.load_payload()?);
        let md = serde_json::to_string(&meta.for_slice(0))?;
        let timeout = self.ctx.config.timeout.send_file;

        let path = EcCtx::ec_path("replica", lom);
        let sends = targets
            .iter()
            .filter(|t| t.id != *self_id)
            .take(meta.parity)
            .map(|tgt| {
                let url = tgt.data_url(&path);
                let payload = payload.clone();
                let md = md.clone();
                async move {
                    self.ctx
                        .client
                        .put_bytes(&url, payload, &[(ECMD_HEADER, md)], timeout)
                        .await
                        .map_err(|e| (tgt.id.clone(), e))
                }
            });
        for res in join_all(sends).await {
            if let Err((node, e)) = res {
                warn!(obj = %uname, %node, %e, "failed to send replica");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Split into slices and send slice `i` to the i-th non-self target of
    /// the HRW list for the object's uname
    async fn send_slices(
        &self,
        lom: &Lom,
        meta: &SliceMeta,
        props: &strata_common::BucketProps,
    ) -> Result<()> {
        let total = meta.slice_cnt();
        let smap = self.ctx.smap.get();
        let uname = lom.uname();
        // first node holds the full object, the next `total` get one slice each
        let targets: Vec<_> = smap
            .hrw_target_list(&uname, total + 1)?
            .into_iter()
            .cloned()
            .collect();

        let mem_required = lom.size() * (total as u64) / meta.data.max(1) as u64;
        let to_disk = mem_required > self.ctx.config.ec.mem_threshold;
        let slices = generate_slices(
            lom,
            meta.data,
            meta.parity,
            props.cksum,
            to_disk,
        )?;

        let timeout = self.ctx.config.timeout.send_file;
        let path = EcCtx::ec_path("slice", lom);
        let sends = slices.into_iter().zip(targets.iter().skip(1)).map(|(slice, tgt)| {
            let url = tgt.data_url(&path);
            let mut md = meta.for_slice(slice.slice_id);
            md.slice_cksum = slice.cksum.clone();
            async move {
                let res = async {
                    let body = slice.backing.read_all()?;
                    self.ctx
                        .client
                        .put_bytes(
                            &url,
                            body,
                            &[(ECMD_HEADER, serde_json::to_string(&md)?)],
                            timeout,
                        )
                        .await
                }
                .await;
                // either backing frees its resource on completion
                slice.backing.release();
                res.map_err(|e| (tgt.id.clone(), e))
            }
        });

        for res in join_all(sends).await {
            if let Err((node, e)) = res {
                warn!(obj = %uname, %node, %e, "failed to send slice");
                return Err(e);
            }
        }
        debug!(obj = %uname, data = meta.data, parity = meta.parity, "EC slices sent");
        Ok(())
    }

    /// Remove the local sidecar and tell every other target to erase its
    /// slice or replica. Best-effort: the authoritative "gone" state is the
    /// absence of the main object.
    async fn cleanup(&self, lom: &mut Lom) -> Result<()> {
        match std::fs::remove_file(lom.ec_meta_fqn()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(obj = %lom.uname(), %e, "failed to remove EC sidecar"),
        }

        let smap = self.ctx.smap.get();
        let self_id = &self.ctx.client.self_node().id;
        let timeout = self.ctx.config.timeout.cplane_operation;
        let path = EcCtx::ec_path("object", lom);
        let dels = smap
            .tmap
            .values()
            .filter(|t| t.id != *self_id)
            .map(|tgt| {
                let url = tgt.data_url(&path);
                async move { (tgt.id.clone(), self.ctx.client.delete(&url, timeout).await) }
            });
        for (node, res) in join_all(dels).await {
            if let Err(e) = res {
                warn!(obj = %lom.uname(), %node, %e, "peer cleanup failed");
            }
        }
        Ok(())
    }
}
