//! Bucket listing ("query") xaction
//!
//! Listing is an on-demand xaction keyed by a client-supplied handle. Per
//! target, the walkers enumerate every mountpath in parallel and a sorted
//! merge feeds the page buffer; the client pages through it with
//! `peek`/`discard`/`next`. When the xaction idles out, its handle disappears
//! and a later lookup returns handle-not-found.

use crate::demand::XactDemandBase;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_common::{Bck, Error, ObjName, Result};
use strata_cluster::Lom;
use strata_fs::walk::{walk_bck, WalkBckOptions};
use strata_fs::{ContentType, Mountpaths};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use xxhash_rust::xxh64::xxh64;

/// Soft cap on buffered entries; the walkers stall above it
const MAX_BUFFERED: usize = 64 * 1024;

/// Entries spot-checked for residency after the first page
const SAMPLE_SIZE: usize = 10;

/// One listing result row
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketEntry {
    pub name: String,
    pub size: u64,
    /// Whether the object's metadata was resident when sampled
    #[serde(default)]
    pub cached: bool,
}

/// What to list
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectsQuery {
    pub bck: Bck,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

struct ListState {
    buf: VecDeque<BucketEntry>,
    walk_done: bool,
    err: Option<String>,
}

/// Paginated object enumeration behind a handle
pub struct ObjectsListingXact {
    demand: XactDemandBase,
    query: ObjectsQuery,
    mpaths: Arc<Mountpaths>,
    state: Mutex<ListState>,
    changed: Arc<Notify>,
    sampled: AtomicBool,
    warmups: AtomicI64,
}

impl ObjectsListingXact {
    /// Start the walkers and return the handle-owning xaction
    pub fn start(
        query: ObjectsQuery,
        mpaths: Arc<Mountpaths>,
        idle_dur: Duration,
    ) -> Arc<Self> {
        let xact = Arc::new(Self {
            demand: XactDemandBase::new("list-objects", Some(query.bck.clone()), idle_dur),
            query,
            mpaths,
            state: Mutex::new(ListState {
                buf: VecDeque::new(),
                walk_done: false,
                err: None,
            }),
            changed: Arc::new(Notify::new()),
            sampled: AtomicBool::new(false),
            warmups: AtomicI64::new(0),
        });

        let walker = Arc::clone(&xact);
        tokio::task::spawn_blocking(move || walker.run_walk());
        xact
    }

    #[must_use]
    pub fn base(&self) -> &crate::base::XactBase {
        self.demand.base()
    }

    #[must_use]
    pub fn demand(&self) -> &XactDemandBase {
        &self.demand
    }

    fn run_walk(self: &Arc<Self>) {
        let abort = self.base().abort_token();
        let idle = self.demand.idle_token();
        let is_aborted: Arc<dyn Fn() -> bool + Send + Sync> = {
            let abort = abort.clone();
            let idle = idle.clone();
            Arc::new(move || abort.is_cancelled() || idle.is_cancelled())
        };
        let opts = WalkBckOptions {
            bck: self.query.bck.clone(),
            ct: ContentType::Obj,
            is_aborted: Some(is_aborted.clone()),
        };
        let prefix = self.query.prefix.clone();

        let res = walk_bck(&self.mpaths, &opts, &mut |entry| {
            if let Some(p) = &prefix {
                if !entry.name.starts_with(p.as_str()) {
                    return Ok(());
                }
            }
            // cooperative backpressure: stall while consumers lag far behind
            loop {
                if is_aborted() {
                    return Err(Error::XactAborted(self.base().id().to_string()));
                }
                if self.state.lock().buf.len() < MAX_BUFFERED {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            self.base().objs_inc();
            self.base().bytes_add(entry.size as i64);
            self.state.lock().buf.push_back(BucketEntry {
                name: entry.name.clone(),
                size: entry.size,
                cached: false,
            });
            self.changed.notify_waiters();
            Ok(())
        });

        let mut state = self.state.lock();
        state.walk_done = true;
        if let Err(e) = res {
            match e {
                Error::XactAborted(_) => debug!(id = %self.base().id(), "listing walk cancelled"),
                e => {
                    warn!(id = %self.base().id(), %e, "listing walk failed");
                    state.err = Some(e.to_string());
                }
            }
        }
        drop(state);
        self.changed.notify_waiters();
    }

    /// Return up to `n` entries without advancing the cursor
    pub async fn peek_n(&self, n: usize) -> Result<Vec<BucketEntry>> {
        self.demand.inc_pending();
        let res = self.peek_inner(n).await;
        self.demand.dec_pending();
        if res.is_ok() {
            self.maybe_sample_residency();
        }
        res
    }

    async fn peek_inner(&self, n: usize) -> Result<Vec<BucketEntry>> {
        loop {
            let notified = self.changed.notified();
            {
                let state = self.state.lock();
                if let Some(e) = &state.err {
                    return Err(Error::internal(e.clone()));
                }
                if state.buf.len() >= n || state.walk_done {
                    return Ok(state.buf.iter().take(n).cloned().collect());
                }
            }
            if self.base().aborted() {
                return Err(Error::XactAborted(self.base().id().to_string()));
            }
            notified.await;
        }
    }

    /// Advance the cursor past every entry with `name <= up_to`
    pub fn discard_until(&self, up_to: &str) {
        let mut state = self.state.lock();
        while let Some(front) = state.buf.front() {
            if front.name.as_str() <= up_to {
                state.buf.pop_front();
            } else {
                break;
            }
        }
        self.demand.renew();
    }

    /// `peek(n)` + discard through the last returned name
    pub async fn next_n(&self, n: usize) -> Result<Vec<BucketEntry>> {
        let page = self.peek_n(n).await?;
        if let Some(last) = page.last() {
            self.discard_until(&last.name);
        }
        Ok(page)
    }

    /// Spot-check ~10 entries of the first page; when fewer than half are
    /// resident, schedule a background metadata warmup for the bucket.
    fn maybe_sample_residency(&self) {
        if self.sampled.swap(true, Ordering::AcqRel) {
            return;
        }
        let sample: Vec<String> = {
            let state = self.state.lock();
            if state.buf.is_empty() {
                return;
            }
            let stride = (state.buf.len() / SAMPLE_SIZE).max(1);
            state
                .buf
                .iter()
                .enumerate()
                .filter(|(i, e)| i % stride == xxh64(e.name.as_bytes(), 0) as usize % stride)
                .take(SAMPLE_SIZE)
                .map(|(_, e)| e.name.clone())
                .collect()
        };
        if sample.is_empty() {
            return;
        }

        let mut resident = 0usize;
        for name in &sample {
            if let Ok(mut lom) = Lom::init(
                self.query.bck.clone(),
                ObjName::new_unchecked(name.clone()),
                &self.mpaths,
            ) {
                if lom.load().unwrap_or(false) {
                    resident += 1;
                }
            }
        }
        if resident * 2 >= sample.len() {
            return;
        }

        info!(
            bck = %self.query.bck,
            resident,
            sampled = sample.len(),
            "scheduling metadata warmup"
        );
        self.warmups.fetch_add(1, Ordering::AcqRel);
        let bck = self.query.bck.clone();
        let mpaths = Arc::clone(&self.mpaths);
        let abort = self.base().abort_token();
        tokio::task::spawn_blocking(move || {
            let opts = WalkBckOptions {
                bck: bck.clone(),
                ct: ContentType::Obj,
                is_aborted: Some(Arc::new(move || abort.is_cancelled())),
            };
            let _ = walk_bck(&mpaths, &opts, &mut |entry| {
                if let Ok(mut lom) = Lom::init(
                    bck.clone(),
                    ObjName::new_unchecked(entry.name.clone()),
                    &mpaths,
                ) {
                    let _ = lom.load();
                }
                Ok(())
            });
        });
    }

    /// Background warmups scheduled so far
    #[must_use]
    pub fn warmups_scheduled(&self) -> i64 {
        self.warmups.load(Ordering::Acquire)
    }

    /// Stop the walkers and close out the xaction
    pub fn stop(&self) {
        self.base().abort();
        self.demand.stop();
    }
}

impl crate::base::Xact for ObjectsListingXact {
    fn base(&self) -> &crate::base::XactBase {
        self.demand.base()
    }
}

/// Handle → listing xaction; idled-out handles disappear
#[derive(Default)]
pub struct QueryRegistry {
    map: Mutex<HashMap<String, Arc<ObjectsListingXact>>>,
}

impl QueryRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a listing under `handle` and arrange its removal on idle
    pub fn put(self: &Arc<Self>, handle: impl Into<String>, xact: Arc<ObjectsListingXact>) {
        let handle = handle.into();
        self.map.lock().insert(handle.clone(), Arc::clone(&xact));

        let registry = Arc::clone(self);
        let idle = xact.demand().idle_token();
        tokio::spawn(async move {
            idle.cancelled().await;
            if registry.map.lock().remove(&handle).is_some() {
                debug!(%handle, "listing handle expired");
                xact.stop();
            }
        });
    }

    pub fn get(&self, handle: &str) -> Result<Arc<ObjectsListingXact>> {
        self.map
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::HandleNotFound(handle.to_string()))
    }

    pub fn remove(&self, handle: &str) -> Option<Arc<ObjectsListingXact>> {
        self.map.lock().remove(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::BucketName;
    use tempfile::TempDir;

    fn bck() -> Bck {
        Bck::strata(BucketName::new_unchecked("b1"))
    }

    fn setup(objs: &[&str]) -> (Vec<TempDir>, Arc<Mountpaths>) {
        let dirs: Vec<TempDir> = (0..2).map(|_| TempDir::new().unwrap()).collect();
        let mps = Arc::new(Mountpaths::new());
        for d in &dirs {
            mps.add(d.path()).unwrap();
        }
        mps.create_bucket_dirs(&bck()).unwrap();
        for (i, name) in objs.iter().enumerate() {
            // spread objects across mountpaths
            let mpath = &mps.available()[i % 2];
            let fqn = mpath.make_fqn(&bck(), ContentType::Obj, &ObjName::new_unchecked(*name));
            std::fs::create_dir_all(fqn.parent().unwrap()).unwrap();
            std::fs::write(fqn, b"x").unwrap();
        }
        (dirs, mps)
    }

    fn query() -> ObjectsQuery {
        ObjectsQuery {
            bck: bck(),
            prefix: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn peek_does_not_advance() {
        let (_dirs, mps) = setup(&["a", "b", "c", "d"]);
        let xact = ObjectsListingXact::start(query(), mps, Duration::from_secs(60));

        let p1 = xact.peek_n(2).await.unwrap();
        let p2 = xact.peek_n(2).await.unwrap();
        assert_eq!(
            p1.iter().map(|e| &e.name).collect::<Vec<_>>(),
            p2.iter().map(|e| &e.name).collect::<Vec<_>>()
        );
        assert_eq!(p1[0].name, "a");
        xact.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn next_equals_peek_plus_discard() {
        let (_dirs, mps) = setup(&["a", "b", "c", "d", "e"]);
        let xact = ObjectsListingXact::start(query(), Arc::clone(&mps), Duration::from_secs(60));

        let n1 = xact.next_n(2).await.unwrap();
        assert_eq!(
            n1.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        let n2 = xact.next_n(2).await.unwrap();
        assert_eq!(
            n2.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["c", "d"]
        );
        // short final page
        let n3 = xact.next_n(2).await.unwrap();
        assert_eq!(
            n3.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["e"]
        );
        xact.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prefix_filters() {
        let (_dirs, mps) = setup(&["log/1", "log/2", "tmp/1"]);
        let q = ObjectsQuery {
            bck: bck(),
            prefix: Some("log/".to_string()),
        };
        let xact = ObjectsListingXact::start(q, mps, Duration::from_secs(60));
        let page = xact.next_n(10).await.unwrap();
        assert_eq!(
            page.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["log/1", "log/2"]
        );
        xact.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_handle_disappears() {
        let (_dirs, mps) = setup(&["a"]);
        let registry = QueryRegistry::new();
        let xact = ObjectsListingXact::start(query(), mps, Duration::from_millis(100));
        registry.put("h1", Arc::clone(&xact));

        let _ = xact.next_n(1).await.unwrap();
        assert!(registry.get("h1").is_ok());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(matches!(
            registry.get("h1"),
            Err(Error::HandleNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn warmup_scheduled_for_cold_listing() {
        // objects exist with payloads only (no sidecars): all non-resident
        let (_dirs, mps) = setup(&["a", "b", "c", "d", "e", "f"]);
        let xact = ObjectsListingXact::start(query(), mps, Duration::from_secs(60));
        let _ = xact.peek_n(6).await.unwrap();
        assert_eq!(xact.warmups_scheduled(), 1);
        // sampling runs once
        let _ = xact.peek_n(6).await.unwrap();
        assert_eq!(xact.warmups_scheduled(), 1);
        xact.stop();
    }
}
