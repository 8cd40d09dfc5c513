//! Housekeeper: named periodic callbacks on one shared timer thread.
//!
//! Subsystems register `(name, callback)` pairs; each callback returns the
//! interval until its next run, so a callback can re-pace itself on every
//! fire. One worker thread services a time-ordered heap, which keeps the
//! process from accumulating one timer per long-lived task.
//!
//! Contract:
//! - on register the callback fires immediately, unless an initial interval
//!   is given;
//! - subsequent fires honor the last returned interval;
//! - `unregister` is idempotent and may be called from inside a callback;
//! - ordering between distinct callbacks is unspecified; a callback is never
//!   run concurrently with itself.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// A housekeeper callback returns the interval until its next fire.
pub type Callback = Box<dyn FnMut() -> Duration + Send>;

struct Entry {
    deadline: Instant,
    seq: u64,
    name: String,
    cb: Callback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State {
    heap: BinaryHeap<Entry>,
    /// Names whose pending entry must be dropped instead of re-armed
    tombstones: HashSet<String>,
    next_seq: u64,
    running: bool,
}

struct Inner {
    state: Mutex<State>,
    cv: Condvar,
}

/// Process-wide registry of periodic callbacks
pub struct Housekeeper {
    inner: Arc<Inner>,
}

impl Housekeeper {
    /// Start a housekeeper with its own worker thread
    #[must_use]
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                tombstones: HashSet::new(),
                next_seq: 0,
                running: true,
            }),
            cv: Condvar::new(),
        });
        let worker = Arc::clone(&inner);
        thread::Builder::new()
            .name("housekeeper".to_string())
            .spawn(move || run(worker))
            .expect("spawn housekeeper thread");
        Self { inner }
    }

    /// The process-wide housekeeper instance
    pub fn global() -> &'static Housekeeper {
        static GLOBAL: OnceLock<Housekeeper> = OnceLock::new();
        GLOBAL.get_or_init(Housekeeper::new)
    }

    /// Register a callback; it fires immediately
    pub fn register(&self, name: impl Into<String>, cb: impl FnMut() -> Duration + Send + 'static) {
        self.schedule(name.into(), Box::new(cb), Duration::ZERO);
    }

    /// Register a callback whose first fire happens after `initial`
    pub fn register_with(
        &self,
        name: impl Into<String>,
        cb: impl FnMut() -> Duration + Send + 'static,
        initial: Duration,
    ) {
        self.schedule(name.into(), Box::new(cb), initial);
    }

    fn schedule(&self, name: String, cb: Callback, initial: Duration) {
        let mut state = self.inner.state.lock();
        state.tombstones.remove(&name);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            deadline: Instant::now() + initial,
            seq,
            name,
            cb,
        });
        drop(state);
        self.inner.cv.notify_one();
    }

    /// Drop a callback by name; unknown names are ignored
    pub fn unregister(&self, name: &str) {
        let mut state = self.inner.state.lock();
        if state.heap.iter().any(|e| e.name == name) {
            state.tombstones.insert(name.to_string());
        }
        drop(state);
        self.inner.cv.notify_one();
    }

    /// Stop the worker and release all timers
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.running = false;
        state.heap.clear();
        state.tombstones.clear();
        drop(state);
        self.inner.cv.notify_one();
    }
}

impl Default for Housekeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Housekeeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(inner: Arc<Inner>) {
    let mut state = inner.state.lock();
    loop {
        if !state.running {
            return;
        }
        let Some(next) = state.heap.peek().map(|e| e.deadline) else {
            inner.cv.wait(&mut state);
            continue;
        };
        let now = Instant::now();
        if next > now {
            inner.cv.wait_until(&mut state, next);
            continue;
        }

        let mut entry = state.heap.pop().expect("peeked entry present");
        if state.tombstones.remove(&entry.name) {
            continue;
        }

        // Run the callback without the lock: it may (un)register.
        drop(state);
        let interval = (entry.cb)();
        trace!(name = %entry.name, ?interval, "housekeeper fired");

        state = inner.state.lock();
        if state.tombstones.remove(&entry.name) {
            continue;
        }
        entry.deadline = Instant::now() + interval;
        state.heap.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};

    fn sleep(ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    #[test]
    fn fires_immediately_then_on_interval() {
        let hk = Housekeeper::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        hk.register("imm", move || {
            f.store(true, AtomicOrdering::SeqCst);
            Duration::from_secs(1)
        });

        sleep(50);
        assert!(fired.swap(false, AtomicOrdering::SeqCst));

        sleep(500);
        assert!(!fired.load(AtomicOrdering::SeqCst));

        sleep(600);
        assert!(fired.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn honors_initial_interval() {
        let hk = Housekeeper::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        hk.register_with(
            "delayed",
            move || {
                f.store(true, AtomicOrdering::SeqCst);
                Duration::from_secs(1)
            },
            Duration::from_millis(500),
        );

        sleep(250);
        assert!(!fired.load(AtomicOrdering::SeqCst));

        sleep(400);
        assert!(fired.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn callback_repaces_itself() {
        let hk = Housekeeper::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        hk.register("repace", move || {
            let n = c.fetch_add(1, AtomicOrdering::SeqCst);
            // first refire quickly, then back off hard
            if n == 0 {
                Duration::from_millis(50)
            } else {
                Duration::from_secs(60)
            }
        });

        sleep(300);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn unregister_stops_firing_and_is_idempotent() {
        let hk = Housekeeper::new();
        let foo = Arc::new(AtomicUsize::new(0));
        let bar = Arc::new(AtomicUsize::new(0));
        let (f, b) = (Arc::clone(&foo), Arc::clone(&bar));
        hk.register_with(
            "foo",
            move || {
                f.fetch_add(1, AtomicOrdering::SeqCst);
                Duration::from_millis(100)
            },
            Duration::from_millis(100),
        );
        hk.register_with(
            "bar",
            move || {
                b.fetch_add(1, AtomicOrdering::SeqCst);
                Duration::from_millis(200)
            },
            Duration::from_millis(200),
        );

        sleep(350);
        assert!(foo.load(AtomicOrdering::SeqCst) >= 2);
        assert!(bar.load(AtomicOrdering::SeqCst) >= 1);

        hk.unregister("foo");
        hk.unregister("foo"); // second call is a no-op
        let frozen = foo.load(AtomicOrdering::SeqCst);

        sleep(400);
        assert_eq!(foo.load(AtomicOrdering::SeqCst), frozen);
        assert!(bar.load(AtomicOrdering::SeqCst) >= 2);
        hk.unregister("bar");
    }

    #[test]
    fn register_unregister_register_again() {
        let hk = Housekeeper::new();
        for round in 0..3 {
            let fired = Arc::new(AtomicBool::new(false));
            let f = Arc::clone(&fired);
            let name = format!("cycle-{round}");
            hk.register_with(
                name.clone(),
                move || {
                    f.store(true, AtomicOrdering::SeqCst);
                    Duration::from_millis(100)
                },
                Duration::from_millis(100),
            );
            sleep(160);
            assert!(fired.load(AtomicOrdering::SeqCst));
            hk.unregister(&name);
        }
    }
}
