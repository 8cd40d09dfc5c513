//! Strata Cluster - versioned cluster-wide metadata and its plumbing
//!
//! The cluster map (Smap), bucket metadata (BMD), and rebalance metadata
//! (RMD) are clonable, monotonically versioned registries replaced as wholes:
//! a mutator locks the owner, clones the current snapshot, applies its change,
//! and publishes the clone. Readers always observe a consistent snapshot.
//!
//! This crate also hosts the pieces the registries travel through: the
//! metasyncer (reliable fan-out of new versions), per-bucket name locks,
//! notification listeners for long-running operations, the intra-cluster
//! HTTP broadcast client, and the target-side local object handle (LOM).

pub mod bmd;
pub mod broadcast;
pub mod lom;
pub mod metasync;
pub mod namelock;
pub mod notif;
pub mod rmd;
pub mod smap;
pub mod snode;
pub mod tokens;

pub use bmd::{Bmd, BmdOwner};
pub use broadcast::{BcastResult, IntraClient};
pub use lom::{Lom, LomMeta};
pub use metasync::{ClusterSnapshot, MetasyncBody, Metasyncer, SyncHandle};
pub use namelock::{NameLockPair, NameLocker};
pub use notif::{NotifMsg, NotifListeners};
pub use rmd::{Rmd, RmdOwner};
pub use smap::{Smap, SmapOwner};
pub use snode::Snode;
pub use tokens::TokenList;
