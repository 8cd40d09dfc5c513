//! Notification listeners
//!
//! Long-running operations (make-n-copies, ec-encode, rename, copy) need the
//! proxy to keep the bucket lock until every target reports "finished". A
//! listener is registered under the operation's txn uuid with the set of
//! expected reporters and a done-callback; targets POST their completion and
//! the callback runs once the last report (or first error, counted as that
//! node's report) arrives.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use strata_common::{Error, NodeId, Result};
use tracing::{debug, error};

/// A target's completion report
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifMsg {
    pub uuid: String,
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Runs when all sources reported; receives the uuid and the first error
pub type NotifDoneCb = Box<dyn FnOnce(&str, Option<String>) + Send>;

struct Listener {
    srcs: HashSet<NodeId>,
    finished: HashSet<NodeId>,
    first_err: Option<String>,
    done_cb: Option<NotifDoneCb>,
}

/// Registry of pending listeners, keyed by txn uuid
#[derive(Default)]
pub struct NotifListeners {
    map: Mutex<HashMap<String, Listener>>,
}

impl NotifListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener expecting a report from each node in `srcs`
    pub fn add(
        &self,
        uuid: impl Into<String>,
        srcs: impl IntoIterator<Item = NodeId>,
        done_cb: NotifDoneCb,
    ) {
        let uuid = uuid.into();
        let srcs: HashSet<NodeId> = srcs.into_iter().collect();
        debug!(%uuid, n = srcs.len(), "registered notification listener");
        let listener = Listener {
            srcs,
            finished: HashSet::new(),
            first_err: None,
            done_cb: Some(done_cb),
        };
        let prev = self.map.lock().insert(uuid.clone(), listener);
        if prev.is_some() {
            error!(%uuid, "replaced an existing notification listener");
        }
    }

    /// Record one target's report; runs the done-callback when the last
    /// expected source has reported. Returns true when the listener completed.
    pub fn finished(&self, msg: &NotifMsg) -> Result<bool> {
        let mut map = self.map.lock();
        let listener = map
            .get_mut(&msg.uuid)
            .ok_or_else(|| Error::HandleNotFound(msg.uuid.clone()))?;
        if !listener.srcs.contains(&msg.node_id) {
            return Err(Error::invalid_argument(format!(
                "node {} is not a source of {}",
                msg.node_id, msg.uuid
            )));
        }
        listener.finished.insert(msg.node_id.clone());
        if let Some(e) = &msg.err {
            listener.first_err.get_or_insert_with(|| e.clone());
        }
        if listener.finished.len() < listener.srcs.len() {
            return Ok(false);
        }

        let mut done = map.remove(&msg.uuid).expect("listener present");
        drop(map);
        debug!(uuid = %msg.uuid, "all sources finished");
        if let Some(cb) = done.done_cb.take() {
            cb(&msg.uuid, done.first_err);
        }
        Ok(true)
    }

    /// Drop a listener without waiting for stragglers (admin abort)
    pub fn abort(&self, uuid: &str) -> bool {
        let Some(mut listener) = self.map.lock().remove(uuid) else {
            return false;
        };
        if let Some(cb) = listener.done_cb.take() {
            cb(uuid, Some("aborted".to_string()));
        }
        true
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.map.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn msg(uuid: &str, node: &str, err: Option<&str>) -> NotifMsg {
        NotifMsg {
            uuid: uuid.to_string(),
            node_id: NodeId::from(node),
            err: err.map(String::from),
        }
    }

    #[test]
    fn fires_after_last_report() {
        let nls = NotifListeners::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        nls.add(
            "tx1",
            [NodeId::from("t1"), NodeId::from("t2")],
            Box::new(move |_, err| {
                assert!(err.is_none());
                f.store(true, Ordering::SeqCst);
            }),
        );

        assert!(!nls.finished(&msg("tx1", "t1", None)).unwrap());
        assert!(!fired.load(Ordering::SeqCst));
        assert!(nls.finished(&msg("tx1", "t2", None)).unwrap());
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(nls.pending(), 0);
    }

    #[test]
    fn first_error_is_kept() {
        let nls = NotifListeners::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        nls.add(
            "tx2",
            [NodeId::from("t1"), NodeId::from("t2")],
            Box::new(move |_, err| {
                assert_eq!(err.as_deref(), Some("disk full"));
                f.store(true, Ordering::SeqCst);
            }),
        );
        nls.finished(&msg("tx2", "t1", Some("disk full"))).unwrap();
        nls.finished(&msg("tx2", "t2", Some("later"))).unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn unknown_uuid_and_source() {
        let nls = NotifListeners::new();
        assert!(nls.finished(&msg("nope", "t1", None)).is_err());
        nls.add("tx3", [NodeId::from("t1")], Box::new(|_, _| {}));
        assert!(nls.finished(&msg("tx3", "t9", None)).is_err());
    }

    #[test]
    fn abort_runs_callback() {
        let nls = NotifListeners::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        nls.add(
            "tx4",
            [NodeId::from("t1")],
            Box::new(move |_, err| {
                assert!(err.is_some());
                f.store(true, Ordering::SeqCst);
            }),
        );
        assert!(nls.abort("tx4"));
        assert!(!nls.abort("tx4"));
        assert!(fired.load(Ordering::SeqCst));
    }
}
