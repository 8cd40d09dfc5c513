//! Xaction base: identity, counters, abort

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use strata_common::Bck;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Point-in-time snapshot of one xaction
#[derive(Clone, Debug, Serialize)]
pub struct XactStats {
    pub id: String,
    pub kind: String,
    pub bck: Option<Bck>,
    pub start_time_ns: u64,
    pub end_time_ns: u64,
    pub obj_count: i64,
    pub byte_count: i64,
    pub failures: i64,
    pub aborted: bool,
}

impl XactStats {
    #[must_use]
    pub fn running(&self) -> bool {
        self.end_time_ns == 0
    }

    #[must_use]
    pub fn finished(&self) -> bool {
        !self.running()
    }
}

/// Common state of every xaction
pub struct XactBase {
    id: String,
    kind: &'static str,
    bck: Option<Bck>,
    sutime: AtomicU64,
    eutime: AtomicU64,
    objects: AtomicI64,
    bytes: AtomicI64,
    failures: AtomicI64,
    abort: CancellationToken,
    aborted: AtomicBool,
}

impl XactBase {
    #[must_use]
    pub fn new(kind: &'static str, bck: Option<Bck>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), kind, bck)
    }

    #[must_use]
    pub fn with_id(id: String, kind: &'static str, bck: Option<Bck>) -> Self {
        let x = Self {
            id,
            kind,
            bck,
            sutime: AtomicU64::new(0),
            eutime: AtomicU64::new(0),
            objects: AtomicI64::new(0),
            bytes: AtomicI64::new(0),
            failures: AtomicI64::new(0),
            abort: CancellationToken::new(),
            aborted: AtomicBool::new(false),
        };
        x.sutime.store(unix_nanos(), Ordering::Release);
        x
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[must_use]
    pub fn bck(&self) -> Option<&Bck> {
        self.bck.as_ref()
    }

    #[must_use]
    pub fn start_time_ns(&self) -> u64 {
        self.sutime.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn end_time_ns(&self) -> u64 {
        self.eutime.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn finished(&self) -> bool {
        self.end_time_ns() != 0
    }

    /// How long ago this xaction finished, if it did
    #[must_use]
    pub fn finished_for(&self) -> Option<Duration> {
        let end = self.end_time_ns();
        if end == 0 {
            return None;
        }
        Some(Duration::from_nanos(unix_nanos().saturating_sub(end)))
    }

    /// Mark completion; idempotent
    pub fn finish(&self) {
        let _ = self
            .eutime
            .compare_exchange(0, unix_nanos(), Ordering::AcqRel, Ordering::Acquire);
    }

    /// Cancellation token observed by the xaction's workers
    #[must_use]
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    #[must_use]
    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Abort: trips the token and marks the end time; idempotent
    pub fn abort(&self) {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.finish();
        self.abort.cancel();
        info!(id = %self.id, kind = self.kind, "xaction aborted");
    }

    pub fn objs_inc(&self) -> i64 {
        self.objects.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn objs_add(&self, n: i64) -> i64 {
        self.objects.fetch_add(n, Ordering::AcqRel) + n
    }

    pub fn bytes_add(&self, n: i64) -> i64 {
        self.bytes.fetch_add(n, Ordering::AcqRel) + n
    }

    pub fn failures_inc(&self) -> i64 {
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[must_use]
    pub fn obj_count(&self) -> i64 {
        self.objects.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn byte_count(&self) -> i64 {
        self.bytes.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> XactStats {
        XactStats {
            id: self.id.clone(),
            kind: self.kind.to_string(),
            bck: self.bck.clone(),
            start_time_ns: self.start_time_ns(),
            end_time_ns: self.end_time_ns(),
            obj_count: self.objects.load(Ordering::Acquire),
            byte_count: self.bytes.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
            aborted: self.aborted(),
        }
    }
}

impl fmt::Display for XactBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bck {
            Some(bck) => write!(f, "{}@{}({})", self.kind, bck, self.id),
            None => write!(f, "{}({})", self.kind, self.id),
        }
    }
}

/// Anything the registry can track
pub trait Xact: Send + Sync {
    fn base(&self) -> &XactBase;

    fn abort(&self) {
        self.base().abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let x = XactBase::new("test", None);
        assert!(!x.finished());
        assert!(x.stats().running());
        x.objs_add(3);
        x.bytes_add(100);
        x.finish();
        x.finish(); // idempotent
        let stats = x.stats();
        assert!(stats.finished());
        assert_eq!(stats.obj_count, 3);
        assert_eq!(stats.byte_count, 100);
        assert!(!stats.aborted);
    }

    #[tokio::test]
    async fn abort_trips_token_once() {
        let x = XactBase::new("test", None);
        let token = x.abort_token();
        assert!(!token.is_cancelled());
        x.abort();
        x.abort(); // idempotent
        assert!(token.is_cancelled());
        assert!(x.aborted());
        assert!(x.finished());
        token.cancelled().await; // resolves immediately
    }
}
