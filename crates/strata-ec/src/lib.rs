//! Strata EC - erasure-coding data plane
//!
//! Each target runs one put jogger and one get jogger per mountpath. The put
//! jogger encodes objects into data/parity slices (or replicates small ones)
//! and cleans up after deletes; the get jogger reconstructs objects from
//! surviving slices and re-uploads what it rebuilt. Work is sharded by the
//! object-to-mountpath mapping, so a single object is serialized without
//! extra locking.

pub mod backing;
pub mod encode;
pub mod get_jogger;
pub mod metadata;
pub mod peer;
pub mod put_jogger;
pub mod xact;

use std::sync::Arc;
use std::time::Instant;
use strata_cluster::{BmdOwner, IntraClient, Lom, SmapOwner};
use strata_common::config::Config;
use strata_common::Result;
use strata_fs::Mountpaths;
use tokio::sync::oneshot;

pub use metadata::{slice_size, SliceMeta};
pub use xact::{XactGet, XactPut};

/// High-priority put requests processed before one low-priority encode is
/// allowed through, to keep a bucket-wide encode from starving client puts
pub const PUT_BATCH_SIZE: usize = 8;

/// Header carrying the slice metadata on intra-cluster EC transfers
pub const ECMD_HEADER: &str = "x-strata-ec-md";

/// What a jogger is asked to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcAction {
    /// Encode (or replicate) the object
    Split,
    /// Remove local metadata and fan out peer cleanup
    Delete,
    /// Rebuild the object from surviving slices or replicas
    Restore,
}

/// One unit of jogger work
pub struct EcRequest {
    pub lom: Lom,
    pub action: EcAction,
    /// Completion signal for the caller, if it wants one
    pub done_tx: Option<oneshot::Sender<Result<()>>>,
    /// Enqueue time, for wait-time accounting
    pub tm: Instant,
}

impl EcRequest {
    #[must_use]
    pub fn new(lom: Lom, action: EcAction) -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                lom,
                action,
                done_tx: Some(tx),
                tm: Instant::now(),
            },
            rx,
        )
    }

    /// Fire-and-forget variant (background encode)
    #[must_use]
    pub fn detached(lom: Lom, action: EcAction) -> Self {
        Self {
            lom,
            action,
            done_tx: None,
            tm: Instant::now(),
        }
    }
}

/// Everything the joggers need from the hosting target
pub struct EcCtx {
    pub client: Arc<IntraClient>,
    pub smap: Arc<SmapOwner>,
    pub bmd: Arc<BmdOwner>,
    pub mpaths: Arc<Mountpaths>,
    pub config: Arc<Config>,
}

impl EcCtx {
    /// Intra-cluster EC path for an object, relative to a node's data URL
    #[must_use]
    pub fn ec_path(kind: &str, lom: &Lom) -> String {
        format!("v1/ec/{}/{}/{}", kind, lom.bck().uid(), lom.objname())
    }
}
