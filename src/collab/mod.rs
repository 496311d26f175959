//! Out-of-scope collaborator traits (§6 "Consumed interfaces")
//!
//! The specification treats cache metadata layout/locking, block I/O
//! submission, data buffers, stats accounting, and the pass-through /
//! invalidate / backfill / clean / metadata-flush engines as external
//! collaborators the MFCWT engines depend on but do not implement. This
//! module defines the trait boundary for each of those collaborators so
//! [`crate::engine_mfcwt`] can be built and tested against the spec's
//! behavior without a real cache device, block volume, or RDMA fabric
//! behind it — the same split the teacher draws between its `IOEngine`
//! trait (`engine::mod`) and the real io_uring/libaio/mmap/sync engines
//! that implement it.
//!
//! [`mock`] provides one in-memory implementation of every trait here,
//! used by the engine's own tests and by the demo binary.

pub mod mock;

use crate::request::{Mapping, Operation, Request};
use crate::stats::EngineStats;
use std::sync::Arc;

/// Which kind of lock (if any) the read/write engines hold over the
/// lines a request's [`Mapping`] covers, per the §4.5 lock-type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLineLock {
    Read,
    Write,
    /// No lock acquired for this request (hit routed to backend, or a
    /// miss with data-admit denied).
    None,
}

/// Outcome of a lock-acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock was acquired inline; the caller proceeds immediately.
    Granted,
    /// Lock acquisition is pending; the `resume` callback passed to
    /// [`LineLocker::acquire`] fires exactly once, later, when the lock
    /// becomes available (§5 "Suspension points").
    Deferred,
    /// Lock acquisition failed outright (not merely deferred). The
    /// request completes with [`crate::error::SplitcacheError::LockError`].
    Failed,
}

/// A callback re-entering the engine at the point lock acquisition left
/// off, once a deferred lock is granted.
pub type ResumeFn = Box<dyn FnOnce() + Send>;

/// Read/write locks over the cache lines (hash buckets) a request's
/// mapping covers. Out of scope per §1 ("cache-line locking primitives");
/// this is the seam the engines call through.
pub trait LineLocker: Send + Sync {
    /// Attempt to acquire `lock` over `mapping`'s lines. `CacheLineLock::None`
    /// is always granted inline without reaching the implementation (the
    /// engines never call `acquire` for that case).
    fn acquire(&self, mapping: &Mapping, lock: CacheLineLock, resume: ResumeFn) -> LockOutcome;

    /// Release a previously granted lock. A no-op for locks that were
    /// never acquired (`CacheLineLock::None`) or already released.
    fn release(&self, mapping: &Mapping, lock: CacheLineLock);
}

/// Cache-metadata mutations the engines drive directly (§6): marking
/// lines valid after a miss is serviced, marking lines clean after a
/// dirty write-through, and repartition moves. Out of scope per §1
/// ("cache metadata layout and map lookup").
pub trait MetadataOps: Send + Sync {
    /// Mark the lines covered by `mapping` as valid/present. Called
    /// under a read lock on the owning hash bucket per §4.6 step 3.
    fn set_valid_map_info(&self, mapping: &Mapping);

    /// Mark the lines covered by `mapping` as clean. Called under a
    /// write lock on the owning hash bucket per §4.6 step 3.
    fn set_clean_map_info(&self, mapping: &Mapping);

    /// Perform any repartition moves required by the write (§4.6 step 3).
    fn part_move(&self, mapping: &Mapping);
}

/// The result an I/O submission's completion callback is invoked with.
#[derive(Debug, Clone)]
pub enum IoOutcome {
    /// The operation succeeded. `data` carries the bytes read, for
    /// submissions the caller needs the payload from (a promoting
    /// backend read); `None` for writes and non-promoting reads.
    Success { data: Option<Vec<u8>> },
    /// The operation failed.
    Failure,
}

impl IoOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, IoOutcome::Failure)
    }
}

/// Invoked exactly once when a dispatched I/O sub-operation completes.
pub type IoCompletion = Box<dyn FnOnce(IoOutcome) + Send>;

/// Block I/O submission to the cache device and the backend volume
/// (§6: `submit_cache_reqs`, `submit_volume_req`). Out of scope per §1
/// ("the underlying block-I/O submission to cache/backend volumes");
/// completions may run on any thread, including inline on the
/// submitting thread, which is why the engines never assume ordering
/// between cache and backend completions (§5 "Ordering").
pub trait IoSubmitter: Send + Sync {
    /// Submit `n_subreqs` cache sub-operations, aggregated by the
    /// collaborator into a single completion.
    fn submit_cache_reqs(&self, op: Operation, length: u64, n_subreqs: u32, completion: IoCompletion);

    /// Submit a single request to the backend volume.
    fn submit_volume_req(&self, op: Operation, length: u64, completion: IoCompletion);
}

/// Allocates, pins, and frees the owned copy buffer a promoting read
/// uses to stage backend bytes before backfill (§6 "Data buffers"). Out
/// of scope per §1; modeled here as a fallible allocator since §7 names
/// "buffer allocation failure during promotion" as a distinct error.
pub trait BufferAllocator: Send + Sync {
    /// Allocate and page-lock a `len`-byte buffer, or return `None` on
    /// allocation failure.
    fn allocate(&self, len: usize) -> Option<Vec<u8>>;
}

/// The external engines the MFCWT read/write state machines hand
/// requests off to on fallback paths: pass-through (bypass the cache
/// entirely), invalidate (after a failed promotion or write error),
/// backfill (write promoted bytes into the cache), clean (flush a dirty
/// line before it can be safely overwritten by a miss), and metadata
/// flush. Out of scope per §1 ("pass-through and invalidate engines
/// invoked on fallback").
pub trait FallbackEngine: Send + Sync {
    /// Bypass the cache for a read that cannot be served through it
    /// (mapping error, unsafe promotion, cache I/O error). Responsible
    /// for eventually firing `req`'s completion callback.
    fn pass_through_read(&self, req: Arc<Request>);

    /// Bypass the cache for a write with a mapping error.
    fn pass_through_write(&self, req: Arc<Request>);

    /// Invalidate the lines covered by `req`'s mapping after a failed
    /// promotion or a write error.
    fn invalidate(&self, req: Arc<Request>);

    /// Write promoted bytes into the mapped cache lines after a
    /// successful promoting read has already delivered them to the
    /// caller.
    fn backfill(&self, req: Arc<Request>, data: Vec<u8>);

    /// Schedule cleaning of dirty lines blocking a miss from being
    /// promoted; the clean engine is responsible for rescheduling `req`
    /// once the lines are clean.
    fn schedule_clean(&self, req: Arc<Request>);

    /// Schedule an asynchronous metadata flush, routing its completion
    /// back through `completion` (§4.6 step 4: "route its completion to
    /// the cache-side completion").
    fn metadata_flush(&self, completion: IoCompletion);
}

/// Bundles every out-of-scope collaborator the read/write engines need,
/// plus the in-crate engine statistics counters. Passed as values (not
/// looked up by name), per the design note in SPEC_FULL.md about
/// resolving the engine/sub-engine cycle through a small capability
/// interface.
#[derive(Clone)]
pub struct Collaborators {
    pub locker: Arc<dyn LineLocker>,
    pub metadata: Arc<dyn MetadataOps>,
    pub io: Arc<dyn IoSubmitter>,
    pub buffers: Arc<dyn BufferAllocator>,
    pub fallback: Arc<dyn FallbackEngine>,
    pub stats: Arc<EngineStats>,
}
