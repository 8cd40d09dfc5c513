//! EC xactions: the per-target put and get pipelines
//!
//! `XactPut` and `XactGet` are demand xactions owning one jogger per
//! mountpath. Requests are dispatched to the jogger of the mountpath that
//! owns the object, which serializes work on any single object without
//! explicit locking. Both register with the mountpath run-group so joggers
//! follow mountpath membership.

use crate::get_jogger::GetJogger;
use crate::put_jogger::PutJogger;
use crate::{EcAction, EcCtx, EcRequest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strata_cluster::Lom;
use strata_common::{Error, Result};
use strata_fs::MpathEventRunner;
use strata_xaction::{Xact, XactDemandBase};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Queue depth of each jogger channel
const JOGGER_QUEUE: usize = 64;

struct PutChans {
    put_tx: mpsc::Sender<EcRequest>,
    xact_tx: mpsc::Sender<EcRequest>,
    stop: CancellationToken,
}

/// Encode/cleanup pipeline
pub struct XactPut {
    demand: Arc<XactDemandBase>,
    ctx: Arc<EcCtx>,
    joggers: Mutex<HashMap<PathBuf, PutChans>>,
}

impl XactPut {
    pub fn new(ctx: Arc<EcCtx>, idle: Duration) -> Arc<Self> {
        let xact = Arc::new(Self {
            demand: Arc::new(XactDemandBase::new("ec-put", None, idle)),
            ctx,
            joggers: Mutex::new(HashMap::new()),
        });
        for mpath in xact.ctx.mpaths.available() {
            xact.spawn_jogger(mpath.path());
        }
        xact
    }

    fn spawn_jogger(&self, mpath: &Path) {
        let mut joggers = self.joggers.lock();
        if joggers.contains_key(mpath) {
            return;
        }
        let (put_tx, put_rx) = mpsc::channel(JOGGER_QUEUE);
        let (xact_tx, xact_rx) = mpsc::channel(JOGGER_QUEUE);
        let stop = CancellationToken::new();
        let jogger = PutJogger {
            ctx: Arc::clone(&self.ctx),
            demand: Arc::clone(&self.demand),
            mpath: mpath.to_path_buf(),
        };
        tokio::spawn(jogger.run(put_rx, xact_rx, stop.clone()));
        joggers.insert(
            mpath.to_path_buf(),
            PutChans {
                put_tx,
                xact_tx,
                stop,
            },
        );
    }

    fn stop_jogger(&self, mpath: &Path) {
        if let Some(chans) = self.joggers.lock().remove(mpath) {
            chans.stop.cancel();
        }
    }

    async fn dispatch(&self, req: EcRequest, high_priority: bool) -> Result<()> {
        let tx = {
            let joggers = self.joggers.lock();
            let chans = joggers
                .get(req.lom.mpath().path())
                .ok_or(Error::NoMountpaths)?;
            if high_priority {
                chans.put_tx.clone()
            } else {
                chans.xact_tx.clone()
            }
        };
        self.demand.inc_pending();
        tx.send(req).await.map_err(|_| {
            self.demand.dec_pending();
            Error::XactAborted(self.demand.base().id().to_string())
        })
    }

    /// Encode one object and wait for the jogger's verdict
    pub async fn encode(&self, lom: Lom) -> Result<()> {
        let (req, rx) = EcRequest::new(lom, EcAction::Split);
        self.dispatch(req, true).await?;
        rx.await
            .map_err(|_| Error::internal("put jogger dropped the request"))?
    }

    /// Low-priority encode (bucket-wide ec-encode sweeps)
    pub async fn encode_background(&self, lom: Lom) -> Result<()> {
        self.dispatch(EcRequest::detached(lom, EcAction::Split), false)
            .await
    }

    /// Erase EC state for a deleted object, cluster-wide
    pub async fn cleanup(&self, lom: Lom) -> Result<()> {
        let (req, rx) = EcRequest::new(lom, EcAction::Delete);
        self.dispatch(req, true).await?;
        rx.await
            .map_err(|_| Error::internal("put jogger dropped the request"))?
    }

    #[must_use]
    pub fn demand(&self) -> &XactDemandBase {
        &self.demand
    }

    pub fn stop(&self) {
        for (_, chans) in self.joggers.lock().drain() {
            chans.stop.cancel();
        }
        self.demand.stop();
    }
}

impl Xact for XactPut {
    fn base(&self) -> &strata_xaction::XactBase {
        self.demand.base()
    }
}

impl MpathEventRunner for XactPut {
    fn name(&self) -> &'static str {
        "ec-put"
    }

    fn req_add(&self, mpath: &Path) {
        self.spawn_jogger(mpath);
    }

    fn req_remove(&self, mpath: &Path) {
        self.stop_jogger(mpath);
    }

    fn req_enable(&self, mpath: &Path) {
        self.spawn_jogger(mpath);
    }

    fn req_disable(&self, mpath: &Path) {
        self.stop_jogger(mpath);
    }
}

struct GetChans {
    tx: mpsc::Sender<EcRequest>,
    stop: CancellationToken,
}

/// Restore pipeline
pub struct XactGet {
    demand: Arc<XactDemandBase>,
    ctx: Arc<EcCtx>,
    joggers: Mutex<HashMap<PathBuf, GetChans>>,
}

impl XactGet {
    pub fn new(ctx: Arc<EcCtx>, idle: Duration) -> Arc<Self> {
        let xact = Arc::new(Self {
            demand: Arc::new(XactDemandBase::new("ec-get", None, idle)),
            ctx,
            joggers: Mutex::new(HashMap::new()),
        });
        for mpath in xact.ctx.mpaths.available() {
            xact.spawn_jogger(mpath.path());
        }
        xact
    }

    fn spawn_jogger(&self, mpath: &Path) {
        let mut joggers = self.joggers.lock();
        if joggers.contains_key(mpath) {
            return;
        }
        let (tx, rx) = mpsc::channel(JOGGER_QUEUE);
        let stop = CancellationToken::new();
        let jogger = Arc::new(GetJogger {
            ctx: Arc::clone(&self.ctx),
            demand: Arc::clone(&self.demand),
            mpath: mpath.to_path_buf(),
            sema: Arc::new(Semaphore::new(self.ctx.config.ec.restore_concurrency)),
        });
        tokio::spawn(jogger.run(rx, stop.clone()));
        joggers.insert(mpath.to_path_buf(), GetChans { tx, stop });
    }

    fn stop_jogger(&self, mpath: &Path) {
        if let Some(chans) = self.joggers.lock().remove(mpath) {
            chans.stop.cancel();
        }
    }

    /// Restore one object and wait for the verdict
    pub async fn restore(&self, lom: Lom) -> Result<()> {
        let tx = {
            let joggers = self.joggers.lock();
            joggers
                .get(lom.mpath().path())
                .map(|c| c.tx.clone())
                .ok_or(Error::NoMountpaths)?
        };
        let (req, rx) = EcRequest::new(lom, EcAction::Restore);
        self.demand.inc_pending();
        tx.send(req).await.map_err(|_| {
            self.demand.dec_pending();
            Error::XactAborted(self.demand.base().id().to_string())
        })?;
        rx.await
            .map_err(|_| Error::internal("get jogger dropped the request"))?
    }

    #[must_use]
    pub fn demand(&self) -> &XactDemandBase {
        &self.demand
    }

    pub fn stop(&self) {
        for (_, chans) in self.joggers.lock().drain() {
            chans.stop.cancel();
        }
        self.demand.stop();
    }
}

impl Xact for XactGet {
    fn base(&self) -> &strata_xaction::XactBase {
        self.demand.base()
    }
}

impl MpathEventRunner for XactGet {
    fn name(&self) -> &'static str {
        "ec-get"
    }

    fn req_add(&self, mpath: &Path) {
        self.spawn_jogger(mpath);
    }

    fn req_remove(&self, mpath: &Path) {
        self.stop_jogger(mpath);
    }

    fn req_enable(&self, mpath: &Path) {
        self.spawn_jogger(mpath);
    }

    fn req_disable(&self, mpath: &Path) {
        self.stop_jogger(mpath);
    }
}

/// Drain a jogger map on shutdown, logging stragglers
pub fn shutdown_all(put: &XactPut, get: &XactGet) {
    if put.demand().pending() > 0 || get.demand().pending() > 0 {
        warn!(
            put_pending = put.demand().pending(),
            get_pending = get.demand().pending(),
            "stopping EC with work in flight"
        );
    }
    put.stop();
    get.stop();
}
