//! MFCWT read/write engines (C5, C6)
//!
//! Multi-Factor Cached Write-Through: per-request state machines that
//! consult the split controller's admission signals, lock the affected
//! cache lines, dispatch I/O to cache and/or backend, and handle
//! completions from multiple submissions with optional promotion
//! (backfill) or invalidation on failure. Translated from
//! `original_source/engine_mfcwt.c`'s module wiring (it imports
//! `netCAS_split`, `engine_pt`, `engine_inv`, `engine_bf` — the same
//! split this crate draws between [`crate::controller`]/[`crate::dispatcher`]
//! and the [`crate::collab::FallbackEngine`] trait).
//!
//! Unlike a synchronous engine, every sub-operation completes through a
//! callback that may run inline (the mock collaborators do, by default)
//! or later, from an arbitrary thread — so [`EngineContext`] is built to
//! be shared behind an `Arc` and cloned freely into completion closures.

pub mod read;
pub mod write;

use crate::admission::AdmissionSource;
use crate::collab::Collaborators;
use crate::dispatcher::Dispatcher;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

pub use read::read;
pub use write::write;

/// Everything the read/write engines need for one cache instance: the
/// collaborator bundle, the active admission source (C3's
/// [`crate::controller::SplitController`] or another
/// [`AdmissionSource`] — the engines never know which, per §6's
/// "boundary toggle"), the single-threaded dispatcher (C4, guarded by a
/// mutex per §5's "serialize to a single logical context" requirement),
/// and the "pending-read-misses blocked" flag the read engine checks at
/// entry.
pub struct EngineContext {
    pub collab: Collaborators,
    pub controller: Arc<dyn AdmissionSource>,
    dispatcher: Mutex<Dispatcher>,
    /// §4.5 step 1: when set, every read is forwarded to pass-through
    /// without consulting admission or touching cache-line locks at
    /// all. Exposed as a plain flag rather than a collaborator trait
    /// since it is local engine state, not an external system.
    pub pending_read_misses_blocked: AtomicBool,
}

impl EngineContext {
    pub fn new(collab: Collaborators, controller: Arc<dyn AdmissionSource>, dispatcher: Dispatcher) -> Self {
        Self {
            collab,
            controller,
            dispatcher: Mutex::new(dispatcher),
            pending_read_misses_blocked: AtomicBool::new(false),
        }
    }

    /// Consult the dispatcher for the next request's load-admit
    /// decision, against the controller's currently published split
    /// ratio. Routes through the context's single dispatcher mutex so
    /// concurrent submitters never corrupt `DispatcherState` (§5).
    fn decide_load_admit(&self) -> crate::request::LoadAdmitDecision {
        let split_ratio = self.controller.query_optimal_split_ratio();
        self.dispatcher.lock().unwrap().decide(split_ratio)
    }
}
