//! Xaction registry
//!
//! Tracks running and recently-finished xactions by id, renews by
//! (kind, bucket) so a second request joins the running instance instead of
//! starting a twin, and reaps finished entries after a grace period.

use crate::base::Xact;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strata_common::{Bck, Error, Result};
use strata_hk::Housekeeper;
use tracing::debug;

const REAP_TICK: Duration = Duration::from_secs(30);

/// Registry of a node's xactions
pub struct XactRegistry {
    entries: Mutex<HashMap<String, Arc<dyn Xact>>>,
    grace: Duration,
}

impl XactRegistry {
    #[must_use]
    pub fn new(grace: Duration) -> Arc<Self> {
        let reg = Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            grace,
        });
        let weak = Arc::downgrade(&reg);
        Housekeeper::global().register_with(
            format!("xact-reg-reap-{:p}", Arc::as_ptr(&reg)),
            move || {
                if let Some(reg) = weak.upgrade() {
                    reg.reap();
                }
                REAP_TICK
            },
            REAP_TICK,
        );
        reg
    }

    /// Track an xaction under its id
    pub fn insert(&self, xact: Arc<dyn Xact>) {
        self.entries
            .lock()
            .insert(xact.base().id().to_string(), xact);
    }

    /// Look up by id
    pub fn get(&self, id: &str) -> Result<Arc<dyn Xact>> {
        self.entries
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::HandleNotFound(id.to_string()))
    }

    /// Return the running xaction of `kind` on `bck`, or create one
    pub fn renew(
        &self,
        kind: &str,
        bck: Option<&Bck>,
        make: impl FnOnce() -> Arc<dyn Xact>,
    ) -> Arc<dyn Xact> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.values().find(|x| {
            x.base().kind() == kind && x.base().bck() == bck && !x.base().finished()
        }) {
            return Arc::clone(existing);
        }
        let created = make();
        entries.insert(created.base().id().to_string(), Arc::clone(&created));
        created
    }

    /// Abort by id
    pub fn abort(&self, id: &str) -> Result<()> {
        self.get(id)?.abort();
        Ok(())
    }

    /// Abort everything still running (shutdown path)
    pub fn abort_all(&self) {
        for xact in self.entries.lock().values() {
            if !xact.base().finished() {
                xact.abort();
            }
        }
    }

    /// Drop finished entries older than the grace period
    pub fn reap(&self) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, x| match x.base().finished_for() {
            Some(age) => age < self.grace,
            None => true,
        });
        let reaped = before - entries.len();
        if reaped > 0 {
            debug!(reaped, "reaped finished xactions");
        }
    }

    /// Stats of every tracked xaction
    #[must_use]
    pub fn stats(&self) -> Vec<crate::base::XactStats> {
        self.entries
            .lock()
            .values()
            .map(|x| x.base().stats())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::XactBase;
    use strata_common::BucketName;

    struct Dummy(XactBase);
    impl Xact for Dummy {
        fn base(&self) -> &XactBase {
            &self.0
        }
    }

    fn bck(name: &str) -> Bck {
        Bck::strata(BucketName::new_unchecked(name))
    }

    #[tokio::test]
    async fn renew_joins_running_instance() {
        let reg = XactRegistry::new(Duration::from_secs(60));
        let b = bck("b1");
        let first = reg.renew("mirror", Some(&b), || {
            Arc::new(Dummy(XactBase::new("mirror", Some(bck("b1")))))
        });
        let second = reg.renew("mirror", Some(&b), || {
            panic!("must not create a twin");
        });
        assert_eq!(first.base().id(), second.base().id());

        // a finished instance does not satisfy renewal
        first.base().finish();
        let third = reg.renew("mirror", Some(&b), || {
            Arc::new(Dummy(XactBase::new("mirror", Some(bck("b1")))))
        });
        assert_ne!(first.base().id(), third.base().id());
    }

    #[tokio::test]
    async fn reap_honors_grace() {
        let reg = XactRegistry::new(Duration::ZERO);
        let x = Arc::new(Dummy(XactBase::new("test", None)));
        reg.insert(x.clone());
        reg.reap();
        assert!(reg.get(x.base().id()).is_ok(), "running xactions survive");

        x.base().finish();
        reg.reap();
        assert!(matches!(
            reg.get(x.base().id()),
            Err(Error::HandleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn abort_by_id() {
        let reg = XactRegistry::new(Duration::from_secs(60));
        let x = Arc::new(Dummy(XactBase::new("test", None)));
        reg.insert(x.clone());
        reg.abort(x.base().id()).unwrap();
        assert!(x.base().aborted());
        assert!(reg.abort("missing").is_err());
    }
}
