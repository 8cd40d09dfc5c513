//! Cluster map
//!
//! The Smap lists every proxy and target plus the current primary proxy.
//! Object-to-target mapping uses rendezvous (HRW) hashing over the object's
//! uname: each target gets a score derived from (uname-hash, target-id) and
//! the highest scores win, so membership changes remap the minimum set of
//! objects.

use crate::snode::Snode;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_common::{Error, NodeId, Result};
use xxhash_rust::xxh64::xxh64;

/// Versioned map of cluster nodes
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Smap {
    pub version: u64,
    pub uuid: String,
    pub primary_id: NodeId,
    pub pmap: BTreeMap<NodeId, Snode>,
    pub tmap: BTreeMap<NodeId, Snode>,
}

impl Smap {
    #[must_use]
    pub fn count_targets(&self) -> usize {
        self.tmap.len()
    }

    #[must_use]
    pub fn count_proxies(&self) -> usize {
        self.pmap.len()
    }

    #[must_use]
    pub fn get_target(&self, id: &NodeId) -> Option<&Snode> {
        self.tmap.get(id)
    }

    #[must_use]
    pub fn get_proxy(&self, id: &NodeId) -> Option<&Snode> {
        self.pmap.get(id)
    }

    #[must_use]
    pub fn get_node(&self, id: &NodeId) -> Option<&Snode> {
        self.tmap.get(id).or_else(|| self.pmap.get(id))
    }

    #[must_use]
    pub fn primary(&self) -> Option<&Snode> {
        self.pmap.get(&self.primary_id)
    }

    #[must_use]
    pub fn is_primary(&self, id: &NodeId) -> bool {
        self.primary_id == *id
    }

    /// Every node in the cluster (proxies then targets)
    pub fn all_nodes(&self) -> impl Iterator<Item = &Snode> {
        self.pmap.values().chain(self.tmap.values())
    }

    /// The target owning `uname`
    pub fn hrw_target(&self, uname: &str) -> Result<&Snode> {
        let key = xxh64(uname.as_bytes(), 0);
        self.tmap
            .values()
            .max_by_key(|sn| xxh64(sn.id.as_bytes(), key))
            .ok_or(Error::NoTargets)
    }

    /// The first `count` targets for `uname` in descending HRW order
    pub fn hrw_target_list(&self, uname: &str, count: usize) -> Result<Vec<&Snode>> {
        if self.tmap.is_empty() {
            return Err(Error::NoTargets);
        }
        if self.tmap.len() < count {
            return Err(Error::InsufficientTargets {
                available: self.tmap.len(),
                required: count,
            });
        }
        let key = xxh64(uname.as_bytes(), 0);
        let mut scored: Vec<(&Snode, u64)> = self
            .tmap
            .values()
            .map(|sn| (sn, xxh64(sn.id.as_bytes(), key)))
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(count);
        Ok(scored.into_iter().map(|(sn, _)| sn).collect())
    }
}

/// Publish-by-clone owner of the Smap
#[derive(Default)]
pub struct SmapOwner {
    cur: RwLock<Arc<Smap>>,
}

impl SmapOwner {
    #[must_use]
    pub fn new(smap: Smap) -> Self {
        Self {
            cur: RwLock::new(Arc::new(smap)),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn get(&self) -> Arc<Smap> {
        Arc::clone(&self.cur.read())
    }

    /// Publish a new version; stale versions are ignored
    pub fn put(&self, smap: Smap) -> bool {
        let mut cur = self.cur.write();
        if smap.version <= cur.version && cur.version != 0 {
            return false;
        }
        *cur = Arc::new(smap);
        true
    }

    /// Clone-mutate-publish in one step; the closure must bump the version
    pub fn modify(&self, mutate: impl FnOnce(&mut Smap)) -> Arc<Smap> {
        let mut cur = self.cur.write();
        let mut clone = (**cur).clone();
        mutate(&mut clone);
        clone.version = cur.version + 1;
        *cur = Arc::new(clone);
        Arc::clone(&cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::NodeRole;

    fn smap(targets: usize) -> Smap {
        let mut sm = Smap {
            version: 1,
            uuid: "cluster-1".to_string(),
            primary_id: NodeId::from("p1"),
            ..Default::default()
        };
        sm.pmap.insert(
            NodeId::from("p1"),
            Snode::new("p1", NodeRole::Proxy, "http://127.0.0.1:8080"),
        );
        for i in 0..targets {
            let id = format!("t{i}");
            sm.tmap.insert(
                NodeId::new(&id),
                Snode::new(id.as_str(), NodeRole::Target, format!("http://127.0.0.1:9{i:03}")),
            );
        }
        sm
    }

    #[test]
    fn hrw_deterministic() {
        let sm = smap(5);
        let a = sm.hrw_target("strata/b1/o1").unwrap().id.clone();
        for _ in 0..10 {
            assert_eq!(sm.hrw_target("strata/b1/o1").unwrap().id, a);
        }
    }

    #[test]
    fn hrw_list_is_prefix_stable() {
        let sm = smap(6);
        let l3 = sm.hrw_target_list("strata/b1/o1", 3).unwrap();
        let l5 = sm.hrw_target_list("strata/b1/o1", 5).unwrap();
        for (a, b) in l3.iter().zip(l5.iter()) {
            assert_eq!(a.id, b.id);
        }
        // distinct targets
        assert_eq!(
            l5.iter().map(|s| s.id.clone()).collect::<std::collections::HashSet<_>>().len(),
            5
        );
    }

    #[test]
    fn hrw_errors() {
        let sm = smap(0);
        assert!(matches!(sm.hrw_target("u"), Err(Error::NoTargets)));
        let sm = smap(2);
        assert!(matches!(
            sm.hrw_target_list("u", 3),
            Err(Error::InsufficientTargets { available: 2, required: 3 })
        ));
    }

    #[test]
    fn owner_version_monotone() {
        let owner = SmapOwner::new(smap(2));
        assert_eq!(owner.get().version, 1);
        let published = owner.modify(|sm| {
            sm.tmap.remove(&NodeId::from("t0"));
        });
        assert_eq!(published.version, 2);
        // stale put ignored
        assert!(!owner.put(smap(2)));
        assert_eq!(owner.get().version, 2);
    }
}
