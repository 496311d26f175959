//! Write engine (C6), §4.6.
//!
//! Write-through state machine: always acquire write locks, reconcile
//! metadata (mark miss-lines valid, dirty-lines clean, repartition
//! moves), submit to cache and backend in parallel, and aggregate their
//! completions into a single callback. No admission input — every write
//! goes to both devices. Grounded on SPEC_FULL.md §4.6 directly; no
//! `original_source/` write path survived retrieval, so the shape
//! mirrors the read engine's (C5) in-flight bookkeeping applied to the
//! two-completions-not-three-branches case.

use super::EngineContext;
use crate::collab::{CacheLineLock, IoOutcome};
use crate::error::SplitcacheError;
use crate::request::{Operation, Request, RequestOutcome};
use std::sync::Arc;

/// Entry point: `write(R)` in the specification.
pub fn write(mut req: Request, ctx: Arc<EngineContext>) {
    // Step 1: always acquire write locks, unconditionally (no admission
    // snapshot on the write path).
    req.data_admit_allowed = false;
    req.load_admit_allowed = None;

    // Step 2: mapping error forwards to pass-through write.
    if req.mapping.mapping_error() {
        let req = Arc::new(req);
        ctx.collab.fallback.pass_through_write(req.clone());
        req.fire_callback(RequestOutcome::Success);
        return;
    }

    let req = Arc::new(req);
    let req2 = req.clone();
    let ctx2 = ctx.clone();
    let outcome = ctx.collab.locker.acquire(
        &req.mapping,
        CacheLineLock::Write,
        Box::new(move || dispatch(req2, ctx2)),
    );
    match outcome {
        crate::collab::LockOutcome::Granted => dispatch(req, ctx),
        crate::collab::LockOutcome::Deferred => {}
        crate::collab::LockOutcome::Failed => {
            req.fire_callback(RequestOutcome::Error(SplitcacheError::LockError(
                crate::error::LockKind::Write,
            )));
        }
    }
}

/// Step 3-5, the "do" step plus submission.
fn dispatch(req: Arc<Request>, ctx: Arc<EngineContext>) {
    // Step 3: metadata reconciliation. A flush is required exactly when
    // this write actually mutated metadata (a miss marked valid, or a
    // dirty line marked clean); a hit on already-clean lines touches no
    // metadata and needs no flush.
    let miss = !req.mapping.hit();
    let dirty = req.mapping.dirty_any();
    if miss {
        ctx.collab.metadata.set_valid_map_info(&req.mapping);
    }
    if dirty {
        ctx.collab.metadata.set_clean_map_info(&req.mapping);
    }
    ctx.collab.metadata.part_move(&req.mapping);
    let flush_required = miss || dirty;

    // Step 4: reserve one pending count for the backend completion, one
    // for the cache completion (the spec's "io_count + 1" collapses to 2
    // here since cache submission is a single aggregated sub-op), plus
    // one more when a metadata flush is required, since its completion
    // is routed into the cache-side completion handler below.
    req.set_pending(if flush_required { 3 } else { 2 });

    if flush_required {
        let req_flush = req.clone();
        let ctx_flush = ctx.clone();
        ctx.collab
            .fallback
            .metadata_flush(Box::new(move |outcome| on_cache_done(req_flush, ctx_flush, outcome)));
    }

    // Step 5: submit to cache and backend in parallel.
    let req_cache = req.clone();
    let ctx_cache = ctx.clone();
    ctx.collab.io.submit_cache_reqs(
        Operation::Write,
        req.length,
        1,
        Box::new(move |outcome| on_cache_done(req_cache, ctx_cache, outcome)),
    );

    let req_backend = req.clone();
    let ctx_backend = ctx.clone();
    ctx.collab.io.submit_volume_req(
        Operation::Write,
        req.length,
        Box::new(move |outcome| on_backend_done(req_backend, ctx_backend, outcome)),
    );
}

fn on_cache_done(req: Arc<Request>, ctx: Arc<EngineContext>, outcome: IoOutcome) {
    if outcome.is_failure() {
        ctx.collab.stats.cache_errors.add(1);
        ctx.collab.stats.fallbacks.add(1);
        req.set_error(SplitcacheError::CacheIoError);
    }
    finish_if_done(req, ctx);
}

fn on_backend_done(req: Arc<Request>, ctx: Arc<EngineContext>, outcome: IoOutcome) {
    if outcome.is_failure() {
        ctx.collab.stats.backend_errors.add(1);
        req.set_error(SplitcacheError::BackendIoError);
        req.set_core_error();
    }
    finish_if_done(req, ctx);
}

/// Step 6: once both completions have landed (in either order, per §5
/// "Ordering"), finalize the request exactly once. A cache-only error
/// still reports success to the caller (the backend write succeeded, so
/// the authoritative copy is intact) while still scheduling invalidate;
/// a backend error (`core_error`) always reports failure.
fn finish_if_done(req: Arc<Request>, ctx: Arc<EngineContext>) {
    if !req.complete_one() {
        return;
    }

    match req.error() {
        Some(_) => {
            ctx.collab.locker.release(&req.mapping, CacheLineLock::Write);
            ctx.collab.fallback.invalidate(req.clone());
            let outcome = if req.is_core_error() {
                RequestOutcome::Error(SplitcacheError::BackendIoError)
            } else {
                RequestOutcome::Success
            };
            req.fire_callback(outcome);
        }
        None => {
            ctx.collab.locker.release(&req.mapping, CacheLineLock::Write);
            req.fire_callback(RequestOutcome::Success);
        }
    }
}
