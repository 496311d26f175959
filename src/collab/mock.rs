//! In-memory mock implementations of every [`super`] collaborator trait.
//!
//! Grounded on the teacher's `engine::mock::MockEngine`: a `Clone`-able,
//! `Arc<Mutex<_>>`-backed struct that tracks every call for test
//! verification and can be configured to succeed or fail. The I/O
//! submitter additionally supports deferred completions, queued on a
//! `crossbeam` channel per device and drained explicitly by a test, so
//! tests can exercise "cache and backend completions may arrive in any
//! order" (§5 "Ordering", P2) instead of only the synchronous-completion
//! happy path.

use super::{
    BufferAllocator, CacheLineLock, Collaborators, FallbackEngine, IoCompletion, IoOutcome,
    IoSubmitter, LineLocker, LockOutcome, MetadataOps, ResumeFn,
};
use crate::request::{Mapping, Operation, Request};
use crate::stats::EngineStats;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// How [`MockLineLocker::acquire`] should respond to the next call(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Grant,
    Defer,
    Fail,
}

/// Mock hash-bucket lock. Tracks acquire/release counts and, in
/// [`LockMode::Defer`] mode, queues resume callbacks for a test to run
/// explicitly via [`MockLineLocker::grant_pending`].
pub struct MockLineLocker {
    mode: Mutex<LockMode>,
    pending: Mutex<Vec<ResumeFn>>,
    acquires: AtomicU64,
    releases: AtomicU64,
}

impl MockLineLocker {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(LockMode::Grant),
            pending: Mutex::new(Vec::new()),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    pub fn set_mode(&self, mode: LockMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn acquires(&self) -> u64 {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Run every queued resume callback (in FIFO order) and clear the
    /// queue, simulating all outstanding locks becoming available.
    pub fn grant_pending(&self) {
        let callbacks = std::mem::take(&mut *self.pending.lock().unwrap());
        for cb in callbacks {
            cb();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Default for MockLineLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl LineLocker for MockLineLocker {
    fn acquire(&self, _mapping: &Mapping, _lock: CacheLineLock, resume: ResumeFn) -> LockOutcome {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock().unwrap() {
            LockMode::Grant => LockOutcome::Granted,
            LockMode::Defer => {
                self.pending.lock().unwrap().push(resume);
                LockOutcome::Deferred
            }
            LockMode::Fail => LockOutcome::Failed,
        }
    }

    fn release(&self, _mapping: &Mapping, _lock: CacheLineLock) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock metadata layer. Records how many times each mutation was
/// invoked; it does not actually maintain a line table, since the
/// engines never read metadata back through this trait (only through
/// [`Mapping`], which the test constructs directly).
#[derive(Default)]
pub struct MockMetadataOps {
    pub set_valid_calls: AtomicU64,
    pub set_clean_calls: AtomicU64,
    pub part_move_calls: AtomicU64,
}

impl MockMetadataOps {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataOps for MockMetadataOps {
    fn set_valid_map_info(&self, _mapping: &Mapping) {
        self.set_valid_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn set_clean_map_info(&self, _mapping: &Mapping) {
        self.set_clean_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn part_move(&self, _mapping: &Mapping) {
        self.part_move_calls.fetch_add(1, Ordering::SeqCst);
    }
}

type Thunk = Box<dyn FnOnce() + Send>;

/// Mock block I/O submitter for both the cache device and the backend
/// volume. Each device's outcome is independently configurable; by
/// default both succeed synchronously. Setting `set_defer(true)` queues
/// completions on a per-device channel instead of running them inline,
/// so a test can interleave `complete_next_cache`/`complete_next_backend`
/// in whatever order it wants to exercise.
pub struct MockIoSubmitter {
    cache_outcome: Mutex<IoOutcome>,
    backend_outcome: Mutex<IoOutcome>,
    defer: AtomicBool,
    cache_tx: Sender<Thunk>,
    cache_rx: Receiver<Thunk>,
    backend_tx: Sender<Thunk>,
    backend_rx: Receiver<Thunk>,
    cache_submits: AtomicU64,
    backend_submits: AtomicU64,
}

impl MockIoSubmitter {
    pub fn new() -> Self {
        let (cache_tx, cache_rx) = unbounded();
        let (backend_tx, backend_rx) = unbounded();
        Self {
            cache_outcome: Mutex::new(IoOutcome::Success { data: None }),
            backend_outcome: Mutex::new(IoOutcome::Success { data: None }),
            defer: AtomicBool::new(false),
            cache_tx,
            cache_rx,
            backend_tx,
            backend_rx,
            cache_submits: AtomicU64::new(0),
            backend_submits: AtomicU64::new(0),
        }
    }

    pub fn set_cache_outcome(&self, outcome: IoOutcome) {
        *self.cache_outcome.lock().unwrap() = outcome;
    }

    pub fn set_backend_outcome(&self, outcome: IoOutcome) {
        *self.backend_outcome.lock().unwrap() = outcome;
    }

    pub fn set_defer(&self, defer: bool) {
        self.defer.store(defer, Ordering::SeqCst);
    }

    pub fn cache_submits(&self) -> u64 {
        self.cache_submits.load(Ordering::SeqCst)
    }

    pub fn backend_submits(&self) -> u64 {
        self.backend_submits.load(Ordering::SeqCst)
    }

    /// Run the oldest queued cache completion, if any. Returns whether
    /// one ran.
    pub fn complete_next_cache(&self) -> bool {
        match self.cache_rx.try_recv() {
            Ok(thunk) => {
                thunk();
                true
            }
            Err(_) => false,
        }
    }

    /// Run the oldest queued backend completion, if any.
    pub fn complete_next_backend(&self) -> bool {
        match self.backend_rx.try_recv() {
            Ok(thunk) => {
                thunk();
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for MockIoSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl IoSubmitter for MockIoSubmitter {
    fn submit_cache_reqs(&self, _op: Operation, _length: u64, _n_subreqs: u32, completion: IoCompletion) {
        self.cache_submits.fetch_add(1, Ordering::SeqCst);
        let outcome = self.cache_outcome.lock().unwrap().clone();
        let thunk: Thunk = Box::new(move || completion(outcome));
        if self.defer.load(Ordering::SeqCst) {
            let _ = self.cache_tx.send(thunk);
        } else {
            thunk();
        }
    }

    fn submit_volume_req(&self, _op: Operation, _length: u64, completion: IoCompletion) {
        self.backend_submits.fetch_add(1, Ordering::SeqCst);
        let outcome = self.backend_outcome.lock().unwrap().clone();
        let thunk: Thunk = Box::new(move || completion(outcome));
        if self.defer.load(Ordering::SeqCst) {
            let _ = self.backend_tx.send(thunk);
        } else {
            thunk();
        }
    }
}

/// Mock buffer allocator. `set_should_fail(true)` simulates the
/// "buffer allocation failure during promotion" error path (§7).
pub struct MockBufferAllocator {
    should_fail: AtomicBool,
}

impl MockBufferAllocator {
    pub fn new() -> Self {
        Self { should_fail: AtomicBool::new(false) }
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }
}

impl Default for MockBufferAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferAllocator for MockBufferAllocator {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        if self.should_fail.load(Ordering::SeqCst) {
            None
        } else {
            Some(vec![0u8; len])
        }
    }
}

/// Mock pass-through/invalidate/backfill/clean/flush engine. Records
/// every call; `pass_through_read`/`pass_through_write` fire the
/// request's own callback with success immediately (bypassing the
/// cache is itself a successful outcome from the caller's point of
/// view, per §7's mapping-error row). `metadata_flush` always succeeds
/// synchronously.
#[derive(Default)]
pub struct MockFallbackEngine {
    pub pass_through_reads: AtomicU64,
    pub pass_through_writes: AtomicU64,
    pub invalidates: AtomicU64,
    pub backfills: Mutex<Vec<Vec<u8>>>,
    pub scheduled_cleans: AtomicU64,
    pub metadata_flushes: AtomicU64,
}

impl MockFallbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backfill_count(&self) -> usize {
        self.backfills.lock().unwrap().len()
    }

    pub fn last_backfill(&self) -> Option<Vec<u8>> {
        self.backfills.lock().unwrap().last().cloned()
    }
}

impl FallbackEngine for MockFallbackEngine {
    fn pass_through_read(&self, _req: Arc<Request>) {
        self.pass_through_reads.fetch_add(1, Ordering::SeqCst);
    }

    fn pass_through_write(&self, _req: Arc<Request>) {
        self.pass_through_writes.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate(&self, _req: Arc<Request>) {
        self.invalidates.fetch_add(1, Ordering::SeqCst);
    }

    fn backfill(&self, _req: Arc<Request>, data: Vec<u8>) {
        self.backfills.lock().unwrap().push(data);
    }

    fn schedule_clean(&self, _req: Arc<Request>) {
        self.scheduled_cleans.fetch_add(1, Ordering::SeqCst);
    }

    fn metadata_flush(&self, completion: IoCompletion) {
        self.metadata_flushes.fetch_add(1, Ordering::SeqCst);
        completion(IoOutcome::Success { data: None });
    }
}

/// Handles to every mock collaborator, for assertions in tests. Built
/// alongside the [`Collaborators`] bundle the engines actually run
/// against.
#[derive(Clone)]
pub struct MockHandles {
    pub locker: Arc<MockLineLocker>,
    pub metadata: Arc<MockMetadataOps>,
    pub io: Arc<MockIoSubmitter>,
    pub buffers: Arc<MockBufferAllocator>,
    pub fallback: Arc<MockFallbackEngine>,
    pub stats: Arc<EngineStats>,
}

/// Build a fully-mocked [`Collaborators`] bundle plus the handles needed
/// to configure and inspect it.
pub fn mock_collaborators() -> (Collaborators, MockHandles) {
    let locker = Arc::new(MockLineLocker::new());
    let metadata = Arc::new(MockMetadataOps::new());
    let io = Arc::new(MockIoSubmitter::new());
    let buffers = Arc::new(MockBufferAllocator::new());
    let fallback = Arc::new(MockFallbackEngine::new());
    let stats = Arc::new(EngineStats::new());

    let collab = Collaborators {
        locker: locker.clone(),
        metadata: metadata.clone(),
        io: io.clone(),
        buffers: buffers.clone(),
        fallback: fallback.clone(),
        stats: stats.clone(),
    };
    let handles = MockHandles { locker, metadata, io, buffers, fallback, stats };
    (collab, handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locker_grants_by_default() {
        let locker = MockLineLocker::new();
        let mapping = Mapping::default();
        let outcome = locker.acquire(&mapping, CacheLineLock::Read, Box::new(|| {}));
        assert_eq!(outcome, LockOutcome::Granted);
        assert_eq!(locker.acquires(), 1);
    }

    #[test]
    fn locker_defers_and_grant_pending_runs_resume() {
        let locker = MockLineLocker::new();
        locker.set_mode(LockMode::Defer);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let outcome = locker.acquire(&Mapping::default(), CacheLineLock::Write, Box::new(move || {
            ran2.store(true, Ordering::SeqCst);
        }));
        assert_eq!(outcome, LockOutcome::Deferred);
        assert!(!ran.load(Ordering::SeqCst));
        locker.grant_pending();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn io_submitter_deferred_allows_out_of_order_completion() {
        let io = MockIoSubmitter::new();
        io.set_defer(true);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        io.submit_cache_reqs(Operation::Read, 4096, 1, Box::new(move |_| o1.lock().unwrap().push("cache")));
        let o2 = order.clone();
        io.submit_volume_req(Operation::Read, 4096, Box::new(move |_| o2.lock().unwrap().push("backend")));

        // Complete backend before cache, demonstrating no ordering is
        // assumed between the two devices.
        assert!(io.complete_next_backend());
        assert!(io.complete_next_cache());
        assert_eq!(*order.lock().unwrap(), vec!["backend", "cache"]);
    }

    #[test]
    fn buffer_allocator_can_be_made_to_fail() {
        let alloc = MockBufferAllocator::new();
        assert!(alloc.allocate(4096).is_some());
        alloc.set_should_fail(true);
        assert!(alloc.allocate(4096).is_none());
    }
}
