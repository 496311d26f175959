//! Request/Mapping data model (§3)
//!
//! One outstanding logical I/O (`Request`) carries its operation kind, byte
//! range, a [`Mapping`] describing which cache lines cover the range, the
//! two admission snapshots captured at entry, a pending-completion
//! counter, a sticky error, an optional promotion copy buffer, and a
//! completion callback. The callback fires exactly once, when the pending
//! counter reaches zero.
//!
//! Modeled as a shared-ownership value (`Arc<Request>`) rather than an
//! arena index: each dispatched sub-operation clones the `Arc`, and
//! whichever completion context observes the counter hit zero invokes the
//! callback — the same "many writers share one counter" shape as the
//! teacher's cache-line-aligned atomic counters, but driven by an explicit
//! counter rather than `Arc::strong_count` (which is advisory only and
//! cannot be relied on to single-fire a callback).

use crate::error::SplitcacheError;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

/// Read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// Per-line descriptor within a [`Mapping`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LineState {
    pub present: bool,
    pub needs_remap: bool,
    pub read_locked: bool,
    pub dirty: bool,
}

/// An ordered sequence of per-line descriptors covering a request's byte
/// range, plus the metadata-lookup error flag.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    pub lines: Vec<LineState>,
    /// Set when the metadata layer could not satisfy the request at all;
    /// triggers pass-through regardless of the per-line states.
    pub error: bool,
}

impl Mapping {
    pub fn new(lines: Vec<LineState>) -> Self {
        Self { lines, error: false }
    }

    pub fn with_error() -> Self {
        Self { lines: Vec::new(), error: true }
    }

    /// `hit(R) = all lines present and none require re-mapping`.
    pub fn hit(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(|l| l.present && !l.needs_remap)
    }

    /// `dirty_any(R) = any line marked dirty`.
    pub fn dirty_any(&self) -> bool {
        self.lines.iter().any(|l| l.dirty)
    }

    /// True if the metadata layer could not satisfy the request.
    pub fn mapping_error(&self) -> bool {
        self.error
    }

    /// True if any covered line is currently read-locked by another
    /// request, which makes promotion on a miss unsafe.
    pub fn any_read_locked(&self) -> bool {
        self.lines.iter().any(|l| l.read_locked)
    }
}

/// Per-request load-admit decision from the dispatcher (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAdmitDecision {
    ToCache,
    ToBackend,
}

/// The outcome delivered to a request's completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Error(SplitcacheError),
}

type Callback = Box<dyn FnOnce(RequestOutcome) + Send>;

/// One outstanding logical I/O. See the module documentation for the
/// lifecycle and single-fire-callback invariant (P1/P2 in the spec).
pub struct Request {
    pub operation: Operation,
    pub offset: u64,
    pub length: u64,
    pub mapping: Mapping,

    /// Snapshot of `data_admit` taken at entry (§4.5 step 2).
    pub data_admit_allowed: bool,
    /// Snapshot of the dispatcher's decision taken at entry.
    pub load_admit_allowed: Option<LoadAdmitDecision>,

    pending: AtomicI64,
    error: Mutex<Option<SplitcacheError>>,
    /// Distinguishes "the backend itself failed" from a sticky `error`
    /// that may have been set by a cache-side failure instead. Needed by
    /// the write engine (§4.6 step 6): a cache error alone still reports
    /// success to the caller (the backend's copy is authoritative), while
    /// a backend error always reports failure.
    core_error: AtomicBool,
    copy_buffer: Mutex<Option<Vec<u8>>>,
    callback: Mutex<Option<Callback>>,
    fired: AtomicBool,
}

impl Request {
    pub fn new(
        operation: Operation,
        offset: u64,
        length: u64,
        mapping: Mapping,
        callback: impl FnOnce(RequestOutcome) + Send + 'static,
    ) -> Self {
        Self {
            operation,
            offset,
            length,
            mapping,
            data_admit_allowed: false,
            load_admit_allowed: None,
            pending: AtomicI64::new(0),
            error: Mutex::new(None),
            core_error: AtomicBool::new(false),
            copy_buffer: Mutex::new(None),
            callback: Mutex::new(Some(Box::new(callback))),
            fired: AtomicBool::new(false),
        }
    }

    /// Set the number of sub-operations this request is waiting on. Must
    /// be called once, before any sub-operation can possibly complete.
    pub fn set_pending(&self, count: i64) {
        self.pending.store(count, Ordering::SeqCst);
    }

    /// Record that one dispatched sub-operation has completed. Returns
    /// `true` if this call brought the pending count to zero (i.e. this
    /// caller is responsible for firing the callback). The counter never
    /// goes negative: a call past zero is a caller bug and is saturated
    /// at zero rather than wrapping.
    #[must_use]
    pub fn complete_one(&self) -> bool {
        let prev = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "Request::complete_one called more times than set_pending allowed");
        prev <= 1
    }

    pub fn pending_count(&self) -> i64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Record a sticky error. The first error recorded wins; later
    /// errors (e.g. a write's backend error racing a cache error) are
    /// dropped rather than overwriting it, matching "accumulate error in
    /// R" in the spec's error table.
    pub fn set_error(&self, err: SplitcacheError) {
        let mut guard = self.error.lock().unwrap();
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<SplitcacheError> {
        self.error.lock().unwrap().clone()
    }

    /// Mark that the backend (not merely the cache) failed. See
    /// [`Request::is_core_error`].
    pub fn set_core_error(&self) {
        self.core_error.store(true, Ordering::SeqCst);
    }

    pub fn is_core_error(&self) -> bool {
        self.core_error.load(Ordering::SeqCst)
    }

    /// Store the owned copy buffer allocated for a promoting backend
    /// read. `None` once freed.
    pub fn set_copy_buffer(&self, buf: Option<Vec<u8>>) {
        *self.copy_buffer.lock().unwrap() = buf;
    }

    pub fn take_copy_buffer(&self) -> Option<Vec<u8>> {
        self.copy_buffer.lock().unwrap().take()
    }

    /// Invoke the completion callback exactly once. Calling this more
    /// than once is a logic error; subsequent calls are no-ops in release
    /// builds and panic in debug builds, as a defense-in-depth guard
    /// against the "last reference" bookkeeping being wrong rather than
    /// a mechanism callers should rely on.
    pub fn fire_callback(&self, outcome: RequestOutcome) {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug_assert!(false, "Request completion callback fired more than once");
            return;
        }
        if let Some(cb) = self.callback.lock().unwrap().take() {
            cb(outcome);
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("operation", &self.operation)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn hit_mapping(n: usize) -> Mapping {
        Mapping::new(vec![LineState { present: true, ..Default::default() }; n])
    }

    #[test]
    fn hit_requires_all_lines_present_and_unmapped() {
        assert!(hit_mapping(3).hit());
        let mut m = hit_mapping(3);
        m.lines[1].present = false;
        assert!(!m.hit());
    }

    #[test]
    fn empty_mapping_is_not_a_hit() {
        assert!(!Mapping::default().hit());
    }

    #[test]
    fn dirty_any_true_if_any_line_dirty() {
        let mut m = hit_mapping(2);
        assert!(!m.dirty_any());
        m.lines[0].dirty = true;
        assert!(m.dirty_any());
    }

    #[test]
    fn callback_fires_exactly_once_p1() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let req = Request::new(Operation::Read, 0, 4096, hit_mapping(1), move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        req.set_pending(3);
        assert!(!req.complete_one());
        assert!(!req.complete_one());
        assert!(req.complete_one());
        req.fire_callback(RequestOutcome::Success);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pending_reaches_zero_exactly_when_all_subops_complete_p2() {
        let req = Request::new(Operation::Write, 0, 4096, hit_mapping(1), |_| {});
        req.set_pending(2);
        assert_eq!(req.pending_count(), 2);
        assert!(!req.complete_one());
        assert_eq!(req.pending_count(), 1);
        assert!(req.complete_one());
        assert_eq!(req.pending_count(), 0);
    }

    #[test]
    fn first_error_sticks() {
        let req = Request::new(Operation::Read, 0, 4096, hit_mapping(1), |_| {});
        req.set_error(SplitcacheError::CacheIoError);
        req.set_error(SplitcacheError::BackendIoError);
        assert_eq!(req.error(), Some(SplitcacheError::CacheIoError));
    }

    #[test]
    fn copy_buffer_round_trip() {
        let req = Request::new(Operation::Read, 0, 4096, hit_mapping(1), |_| {});
        assert!(req.take_copy_buffer().is_none());
        req.set_copy_buffer(Some(vec![1, 2, 3]));
        assert_eq!(req.take_copy_buffer(), Some(vec![1, 2, 3]));
        assert!(req.take_copy_buffer().is_none());
    }
}
