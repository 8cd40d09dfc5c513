//! On-demand xactions
//!
//! A demand xaction stays alive while work keeps arriving and self-terminates
//! after a quiet period. Pending work is reference-counted; an `active`
//! counter, read-and-reset on every housekeeper tick, catches requests that
//! both arrived and completed between two ticks. The housekeeper fires at
//! half the idle duration and the idle channel closes on the second
//! consecutive quiet tick, so a momentary lull between batches does not kill
//! the xaction.

use crate::base::{Xact, XactBase};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_common::Bck;
use strata_hk::Housekeeper;
use tokio_util::sync::CancellationToken;

/// Consecutive quiet ticks required before the idle channel closes
const IDLE_TICKS: u32 = 2;

struct DemandInner {
    pending: AtomicI64,
    active: AtomicI64,
    quiet_ticks: AtomicU32,
    idle: CancellationToken,
}

/// Base of every on-demand xaction
pub struct XactDemandBase {
    base: XactBase,
    inner: Arc<DemandInner>,
    hk: &'static Housekeeper,
    hk_name: String,
}

impl XactDemandBase {
    /// Create and hook the idle detector into the global housekeeper
    #[must_use]
    pub fn new(kind: &'static str, bck: Option<Bck>, idle_dur: Duration) -> Self {
        Self::with_housekeeper(kind, bck, idle_dur, Housekeeper::global())
    }

    /// Variant for tests that want their own housekeeper
    #[must_use]
    pub fn with_housekeeper(
        kind: &'static str,
        bck: Option<Bck>,
        idle_dur: Duration,
        hk: &'static Housekeeper,
    ) -> Self {
        let base = XactBase::new(kind, bck);
        let inner = Arc::new(DemandInner {
            pending: AtomicI64::new(0),
            active: AtomicI64::new(0),
            quiet_ticks: AtomicU32::new(0),
            idle: CancellationToken::new(),
        });
        let hk_name = format!("xact-idle-{}", base.id());
        let tick = Arc::clone(&inner);
        let half = (idle_dur / 2).max(Duration::from_millis(1));
        hk.register_with(
            hk_name.clone(),
            move || {
                let busy = tick.pending.load(Ordering::Acquire) > 0
                    || tick.active.swap(0, Ordering::AcqRel) > 0;
                if busy {
                    tick.quiet_ticks.store(0, Ordering::Release);
                } else if tick.quiet_ticks.fetch_add(1, Ordering::AcqRel) + 1 >= IDLE_TICKS {
                    tick.idle.cancel();
                }
                half
            },
            half,
        );
        Self {
            base,
            inner,
            hk,
            hk_name,
        }
    }

    #[must_use]
    pub fn base(&self) -> &XactBase {
        &self.base
    }

    /// Token cancelled when the xaction is provably idle
    #[must_use]
    pub fn idle_token(&self) -> CancellationToken {
        self.inner.idle.clone()
    }

    #[must_use]
    pub fn pending(&self) -> i64 {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// A request arrived
    pub fn inc_pending(&self) {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        self.inner.quiet_ticks.store(0, Ordering::Release);
    }

    /// A request completed
    pub fn dec_pending(&self) {
        self.sub_pending(1);
    }

    pub fn sub_pending(&self, n: i64) {
        let left = self.inner.pending.fetch_sub(n, Ordering::AcqRel) - n;
        debug_assert!(left >= 0, "pending went negative");
    }

    /// Push the idle deadline out when no work is pending; a consumer that
    /// knows about an upcoming gap calls this to keep the xaction alive.
    pub fn renew(&self) {
        if self.pending() == 0 {
            self.inner.quiet_ticks.store(0, Ordering::Release);
        }
    }

    /// Unregister the idle detector and close the idle channel; idempotent
    pub fn stop(&self) {
        self.hk.unregister(&self.hk_name);
        self.inner.idle.cancel();
        self.base.finish();
    }
}

impl Drop for XactDemandBase {
    fn drop(&mut self) {
        self.hk.unregister(&self.hk_name);
    }
}

impl Xact for XactDemandBase {
    fn base(&self) -> &XactBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    const IDLE: Duration = Duration::from_millis(100);

    #[tokio::test(flavor = "multi_thread")]
    async fn idles_out_after_quiet_period() {
        let x = XactDemandBase::new("test-demand", None, IDLE);
        let idle = x.idle_token();
        x.inc_pending();
        x.dec_pending();

        timeout(Duration::from_millis(600), idle.cancelled())
            .await
            .expect("idle channel should close");
        x.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_work_holds_it_open() {
        let x = XactDemandBase::new("test-demand", None, IDLE);
        let idle = x.idle_token();
        x.inc_pending();

        sleep(Duration::from_millis(400)).await;
        assert!(!idle.is_cancelled(), "pending > 0 must keep the channel open");

        x.dec_pending();
        timeout(Duration::from_millis(600), idle.cancelled())
            .await
            .expect("idle channel should close after the work drains");
        x.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn steady_traffic_resets_the_clock() {
        let x = XactDemandBase::new("test-demand", None, IDLE);
        let idle = x.idle_token();

        // bursts that complete instantly, spaced within the idle window
        for _ in 0..6 {
            x.inc_pending();
            x.dec_pending();
            sleep(Duration::from_millis(40)).await;
            assert!(!idle.is_cancelled());
        }
        x.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_is_idempotent_and_closes_idle() {
        let x = XactDemandBase::new("test-demand", None, Duration::from_secs(60));
        let idle = x.idle_token();
        x.stop();
        x.stop();
        assert!(idle.is_cancelled());
        assert!(x.base().finished());
    }
}
