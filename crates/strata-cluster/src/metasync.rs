//! Metasync: reliable fan-out of new metadata versions
//!
//! The primary proxy hands the metasyncer a `(payload, action-msg)` pair; the
//! metasyncer delivers it to every node in the current Smap and the returned
//! handle completes when each node has acknowledged or been given up on.
//! Deliveries to one receiver are serialized per sender; across senders,
//! receiver-side version monotonicity resolves ordering (stale payloads are
//! ignored on arrival).

use crate::bmd::{Bmd, BmdOwner};
use crate::broadcast::IntraClient;
use crate::rmd::{Rmd, RmdOwner};
use crate::smap::{Smap, SmapOwner};
use crate::tokens::{TokenList, TokenStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strata_common::{ActionMsg, NodeId};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};

/// Attempts per node before the metasyncer gives up on it
const RETRY_COUNT: usize = 3;
/// Pause between attempts
const RETRY_PAUSE: Duration = Duration::from_secs(1);
/// Per-request budget
const REQ_TIMEOUT: Duration = Duration::from_secs(2);

/// Path every node serves the metasync receiver on
pub const METASYNC_PATH: &str = "v1/metasync";

/// Wire body: at most one revision of each registry plus the action that
/// produced it
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetasyncBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smap: Option<Smap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmd: Option<Bmd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rmd: Option<Rmd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<ActionMsg>,
}

impl MetasyncBody {
    #[must_use]
    pub fn bmd(bmd: Bmd, msg: ActionMsg) -> Self {
        Self {
            bmd: Some(bmd),
            msg: Some(msg),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn rmd(rmd: Rmd, msg: ActionMsg) -> Self {
        Self {
            rmd: Some(rmd),
            msg: Some(msg),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn smap(smap: Smap) -> Self {
        Self {
            smap: Some(smap),
            ..Default::default()
        }
    }
}

/// Everything a node needs to start serving: handed out on cluster join
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub smap: Smap,
    pub bmd: Bmd,
    pub rmd: Rmd,
    pub tokens: TokenList,
}

/// Receiver-side application; each registry is adopted only if newer
pub fn apply_received(
    body: MetasyncBody,
    smap: &SmapOwner,
    bmd: &BmdOwner,
    rmd: &RmdOwner,
    tokens: &TokenStore,
) {
    if let Some(new_smap) = body.smap {
        let v = new_smap.version;
        if smap.put(new_smap) {
            debug!(version = v, "metasync: adopted Smap");
        }
    }
    if let Some(new_bmd) = body.bmd {
        bmd.receive(new_bmd);
    }
    if let Some(new_rmd) = body.rmd {
        let v = new_rmd.version;
        if rmd.receive(new_rmd) {
            debug!(version = v, "metasync: adopted RMD");
        }
    }
    if let Some(new_tokens) = body.tokens {
        tokens.receive(new_tokens);
    }
}

/// Result of one sync round
#[derive(Debug)]
pub struct SyncOutcome {
    /// Nodes that never acknowledged within the retry budget
    pub failed: Vec<NodeId>,
}

/// Completion handle returned by [`Metasyncer::sync`]
pub struct SyncHandle {
    rx: oneshot::Receiver<SyncOutcome>,
}

impl SyncHandle {
    /// Wait for the fan-out to finish
    pub async fn wait(self) -> SyncOutcome {
        self.rx.await.unwrap_or(SyncOutcome { failed: Vec::new() })
    }
}

/// The fan-out service; lives on the primary proxy (every proxy owns one,
/// only the primary publishes)
pub struct Metasyncer {
    client: Arc<IntraClient>,
    smap: Arc<SmapOwner>,
    /// Serializes deliveries per receiver
    per_node: Mutex<HashMap<NodeId, Arc<AsyncMutex<()>>>>,
}

impl Metasyncer {
    #[must_use]
    pub fn new(client: Arc<IntraClient>, smap: Arc<SmapOwner>) -> Self {
        Self {
            client,
            smap,
            per_node: Mutex::new(HashMap::new()),
        }
    }

    fn node_gate(&self, id: &NodeId) -> Arc<AsyncMutex<()>> {
        let mut map = self.per_node.lock();
        map.entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Disseminate `body` to every node in the current Smap except self.
    ///
    /// Returns immediately; await the handle to synchronize (the txn protocol
    /// waits before committing).
    pub fn sync(&self, body: MetasyncBody) -> SyncHandle {
        let (tx, rx) = oneshot::channel();
        let smap = self.smap.get();
        let self_id = self.client.self_node().id.clone();
        let client = Arc::clone(&self.client);

        let legs: Vec<(crate::snode::Snode, Arc<AsyncMutex<()>>)> = smap
            .all_nodes()
            .filter(|sn| sn.id != self_id)
            .map(|sn| (sn.clone(), self.node_gate(&sn.id)))
            .collect();

        tokio::spawn(async move {
            let futs = legs.into_iter().map(|(node, gate)| {
                let client = Arc::clone(&client);
                let body = body.clone();
                async move {
                    let _serialized = gate.lock().await;
                    let url = node.control_url(METASYNC_PATH);
                    for attempt in 1..=RETRY_COUNT {
                        match client.post_json(&url, &[], &body, REQ_TIMEOUT).await {
                            Ok(()) => return None,
                            Err(e) if attempt == RETRY_COUNT => {
                                warn!(node = %node.id, %e, "metasync: giving up");
                                return Some(node.id.clone());
                            }
                            Err(e) => {
                                debug!(node = %node.id, attempt, %e, "metasync: retrying");
                                tokio::time::sleep(RETRY_PAUSE).await;
                            }
                        }
                    }
                    None
                }
            });
            let failed: Vec<NodeId> = futures::future::join_all(futs)
                .await
                .into_iter()
                .flatten()
                .collect();
            let _ = tx.send(SyncOutcome { failed });
        });

        SyncHandle { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_is_version_monotone() {
        let smap_owner = SmapOwner::default();
        let bmd_owner = BmdOwner::new(Bmd::new("u1"));
        let rmd_owner = RmdOwner::default();
        let tokens = TokenStore::default();

        let mut newer = Bmd::new("u1");
        newer.version = 7;
        apply_received(
            MetasyncBody::bmd(newer, ActionMsg::new(strata_common::Action::CreateBucket)),
            &smap_owner,
            &bmd_owner,
            &rmd_owner,
            &tokens,
        );
        assert_eq!(bmd_owner.get().version, 7);

        // lower-versioned payload is ignored
        let mut older = Bmd::new("u1");
        older.version = 3;
        apply_received(
            MetasyncBody::bmd(older, ActionMsg::new(strata_common::Action::CreateBucket)),
            &smap_owner,
            &bmd_owner,
            &rmd_owner,
            &tokens,
        );
        assert_eq!(bmd_owner.get().version, 7);
    }

    #[tokio::test]
    async fn sync_with_empty_smap_completes() {
        use strata_common::NodeRole;
        let self_node = crate::snode::Snode::new("p1", NodeRole::Proxy, "http://127.0.0.1:1");
        let client = Arc::new(IntraClient::new(self_node));
        let ms = Metasyncer::new(client, Arc::new(SmapOwner::default()));
        let out = ms.sync(MetasyncBody::default()).wait().await;
        assert!(out.failed.is_empty());
    }
}
