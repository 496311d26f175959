//! Read engine (C5), §4.5.
//!
//! Per-read state machine: admission snapshot, lock-type selection,
//! cache/backend dispatch, promotion, and the three completion
//! handlers (cache, backend-no-promote, backend-promote). Grounded on
//! `original_source/engine_mfcwt.c`'s read path; the in-flight
//! bookkeeping (one pending counter, fired exactly once) follows the
//! same shape as the teacher's former
//! `worker::Worker::run_until_stopped` in-flight-op accounting, applied
//! per-request instead of per-worker.

use super::EngineContext;
use crate::collab::{CacheLineLock, IoOutcome, LockOutcome};
use crate::error::{LockKind, SplitcacheError};
use crate::request::{LoadAdmitDecision, Operation, Request, RequestOutcome};
use std::sync::Arc;

/// Entry point: `read(R)` in the specification.
///
/// Takes ownership of a freshly-created [`Request`] (not yet shared)
/// so the admission snapshots can be written into its plain fields
/// before it is wrapped in an `Arc` and handed to possibly-async
/// sub-operations.
pub fn read(mut req: Request, ctx: Arc<EngineContext>) {
    // Step 1: global pending-read-misses-blocked short-circuit.
    if ctx
        .pending_read_misses_blocked
        .load(std::sync::atomic::Ordering::SeqCst)
    {
        let req = Arc::new(req);
        ctx.collab.fallback.pass_through_read(req.clone());
        req.fire_callback(RequestOutcome::Success);
        return;
    }

    // Step 2: snapshot both admission signals at entry.
    req.data_admit_allowed = ctx.controller.query_data_admit();
    req.load_admit_allowed = Some(ctx.decide_load_admit());

    // Step 4 (checked early, same effect as the spec's ordering since
    // mapping errors bypass locking and dispatch entirely): mapping
    // error forwards to pass-through and reports success.
    if req.mapping.mapping_error() {
        let req = Arc::new(req);
        ctx.collab.fallback.pass_through_read(req.clone());
        req.fire_callback(RequestOutcome::Success);
        return;
    }

    // Step 3: lock-type policy table.
    let hit = req.mapping.hit();
    let decision = req.load_admit_allowed.unwrap();
    let lock_kind = lock_policy(hit, decision, req.data_admit_allowed);

    let req = Arc::new(req);
    acquire_then_dispatch(req, ctx, lock_kind);
}

/// §4.5's lock-type policy table.
fn lock_policy(hit: bool, decision: LoadAdmitDecision, data_admit: bool) -> CacheLineLock {
    match (hit, decision, data_admit) {
        (true, LoadAdmitDecision::ToCache, _) => CacheLineLock::Read,
        (true, LoadAdmitDecision::ToBackend, _) => CacheLineLock::None,
        (false, _, true) => CacheLineLock::Write,
        (false, _, false) => CacheLineLock::None,
    }
}

fn acquire_then_dispatch(req: Arc<Request>, ctx: Arc<EngineContext>, lock_kind: CacheLineLock) {
    if lock_kind == CacheLineLock::None {
        dispatch(req, ctx);
        return;
    }

    let req2 = req.clone();
    let ctx2 = ctx.clone();
    let outcome = ctx.collab.locker.acquire(
        &req.mapping,
        lock_kind,
        Box::new(move || dispatch(req2, ctx2)),
    );
    match outcome {
        LockOutcome::Granted => dispatch(req, ctx),
        // Step 5: resumed later via the callback passed to `acquire`.
        LockOutcome::Deferred => {}
        LockOutcome::Failed => {
            let kind = match lock_kind {
                CacheLineLock::Read => LockKind::Read,
                CacheLineLock::Write => LockKind::Write,
                CacheLineLock::None => unreachable!("None never reaches acquire"),
            };
            req.fire_callback(RequestOutcome::Error(SplitcacheError::LockError(kind)));
        }
    }
}

/// Step 6, the "do" step.
fn dispatch(req: Arc<Request>, ctx: Arc<EngineContext>) {
    if req.mapping.hit() {
        if req.load_admit_allowed == Some(LoadAdmitDecision::ToCache) {
            req.set_pending(1);
            let req2 = req.clone();
            let ctx2 = ctx.clone();
            ctx.collab.io.submit_cache_reqs(
                Operation::Read,
                req.length,
                1,
                Box::new(move |outcome| on_cache_done(req2, ctx2, outcome)),
            );
        } else {
            submit_backend_read(req, ctx, false);
        }
        return;
    }

    // Miss.
    if !req.data_admit_allowed {
        submit_backend_read(req, ctx, false);
        return;
    }

    if req.mapping.any_read_locked() {
        // Cannot safely promote: switch to pass-through. The write
        // lock acquired above (if any) is released first since
        // pass-through bypasses the cache entirely.
        ctx.collab.locker.release(&req.mapping, CacheLineLock::Write);
        ctx.collab.stats.fallbacks.add(1);
        ctx.collab.fallback.pass_through_read(req.clone());
        req.fire_callback(RequestOutcome::Success);
        return;
    }

    if req.mapping.dirty_any() {
        // Cleaning reschedules R; this engine's responsibility ends at
        // handing it off.
        ctx.collab.fallback.schedule_clean(req);
        return;
    }

    ctx.collab.metadata.set_valid_map_info(&req.mapping);

    match ctx.collab.buffers.allocate(req.length as usize) {
        None => {
            // §7: buffer allocation failure during promotion routes to
            // the promote-completion with a no-memory error so the
            // invalidate path runs, without ever reaching
            // `submit_volume_req`.
            req.set_pending(1);
            req.set_error(SplitcacheError::AllocationFailure);
            finish_promote(req, ctx);
        }
        Some(buf) => {
            req.set_copy_buffer(Some(buf));
            req.set_pending(1);
            let req2 = req.clone();
            let ctx2 = ctx.clone();
            ctx.collab.io.submit_volume_req(
                Operation::Read,
                req.length,
                Box::new(move |outcome| on_backend_promote_done(req2, ctx2, outcome)),
            );
        }
    }
}

fn submit_backend_read(req: Arc<Request>, ctx: Arc<EngineContext>, promote: bool) {
    debug_assert!(!promote, "non-promoting submission only");
    req.set_pending(1);
    let req2 = req.clone();
    let ctx2 = ctx.clone();
    ctx.collab.io.submit_volume_req(
        Operation::Read,
        req.length,
        Box::new(move |outcome| on_backend_no_promote_done(req2, ctx2, outcome)),
    );
}

/// Cache completion (hit, `ToCache`).
fn on_cache_done(req: Arc<Request>, ctx: Arc<EngineContext>, outcome: IoOutcome) {
    if outcome.is_failure() {
        req.set_error(SplitcacheError::CacheIoError);
    }
    if req.complete_one() {
        if let Some(_err) = req.error() {
            ctx.collab.stats.cache_errors.add(1);
            ctx.collab.stats.fallbacks.add(1);
            ctx.collab.locker.release(&req.mapping, CacheLineLock::Read);
            // Ownership of the completion callback transfers to
            // pass-through here: per `FallbackEngine::pass_through_read`'s
            // contract, it is responsible for eventually firing `req`'s
            // callback with whatever outcome it produces. The engine must
            // not also fire it, or the callback would run twice.
            ctx.collab.fallback.pass_through_read(req.clone());
        } else {
            ctx.collab.locker.release(&req.mapping, CacheLineLock::Read);
            req.fire_callback(RequestOutcome::Success);
        }
    }
}

/// Backend completion, non-promoting path (hit routed to backend, or
/// miss with data-admit denied).
fn on_backend_no_promote_done(req: Arc<Request>, ctx: Arc<EngineContext>, outcome: IoOutcome) {
    if outcome.is_failure() {
        req.set_error(SplitcacheError::BackendIoError);
    }
    if req.complete_one() {
        if let Some(err) = req.error() {
            ctx.collab.stats.backend_errors.add(1);
            req.take_copy_buffer();
            ctx.collab.fallback.invalidate(req.clone());
            req.fire_callback(RequestOutcome::Error(err));
        } else {
            req.fire_callback(RequestOutcome::Success);
        }
    }
}

/// Backend completion, promoting path.
fn on_backend_promote_done(req: Arc<Request>, ctx: Arc<EngineContext>, outcome: IoOutcome) {
    match &outcome {
        IoOutcome::Failure => req.set_error(SplitcacheError::BackendIoError),
        IoOutcome::Success { data } => {
            if let (Some(mut buf), Some(bytes)) = (req.take_copy_buffer(), data.as_ref()) {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                req.set_copy_buffer(Some(buf));
            }
        }
    }
    if req.complete_one() {
        finish_promote(req, ctx);
    }
}

/// Shared tail of the promoting path once the pending counter reaches
/// zero, whether the backend actually ran or allocation failed before
/// it could be submitted (§7).
fn finish_promote(req: Arc<Request>, ctx: Arc<EngineContext>) {
    if let Some(err) = req.error() {
        ctx.collab.stats.backend_errors.add(1);
        // P4: the copy buffer is freed before invalidate runs, so no
        // partial data can ever reach backfill.
        req.take_copy_buffer();
        ctx.collab.locker.release(&req.mapping, CacheLineLock::Write);
        ctx.collab.fallback.invalidate(req.clone());
        req.fire_callback(RequestOutcome::Error(err));
    } else {
        ctx.collab.locker.release(&req.mapping, CacheLineLock::Write);
        let data = req.take_copy_buffer().unwrap_or_default();
        req.fire_callback(RequestOutcome::Success);
        ctx.collab.stats.promotions.add(1);
        ctx.collab.fallback.backfill(req, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mock::mock_collaborators;
    use crate::collab::mock::LockMode;
    use crate::config::Tunables;
    use crate::controller::SplitController;
    use crate::dispatcher::Dispatcher;
    use crate::request::{LineState, Mapping};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn ctx_with_split_ratio(ratio: u8) -> (Arc<EngineContext>, crate::collab::mock::MockHandles) {
        let (collab, handles) = mock_collaborators();
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        // Drive the controller to Idle (the default at construction) so
        // `query_optimal_split_ratio` returns 100 and `data_admit` is
        // true, then override indirectly via requests that don't depend
        // on controller internals for these unit tests: we instead rely
        // on the dispatcher's ratio parameter being whatever the
        // controller happens to publish (100/true at construction).
        let _ = ratio; // controller always starts at 100/Idle; see split_ratio note above
        let dispatcher = Dispatcher::new(&tunables);
        (Arc::new(EngineContext::new(collab, controller, dispatcher)), handles)
    }

    fn hit_mapping(n: usize) -> Mapping {
        Mapping::new(vec![LineState { present: true, ..Default::default() }; n])
    }

    fn miss_mapping(n: usize) -> Mapping {
        Mapping::new(vec![LineState { present: false, ..Default::default() }; n])
    }

    fn outcome_recorder() -> (impl FnOnce(RequestOutcome) + Send, Arc<StdMutex<Option<RequestOutcome>>>) {
        let slot = Arc::new(StdMutex::new(None));
        let slot2 = slot.clone();
        (move |outcome| *slot2.lock().unwrap() = Some(outcome), slot)
    }

    #[test]
    fn scenario1_cache_hit_cache_selected() {
        let (ctx, handles) = ctx_with_split_ratio(100); // Idle: split ratio 100 -> dispatcher always ToCache
        let (cb, slot) = outcome_recorder();
        let req = Request::new(crate::request::Operation::Read, 0, 4096, hit_mapping(1), cb);
        read(req, ctx.clone());

        assert_eq!(handles.io.cache_submits(), 1);
        assert_eq!(handles.io.backend_submits(), 0);
        assert_eq!(*slot.lock().unwrap(), Some(RequestOutcome::Success));
        assert_eq!(handles.locker.acquires(), 1);
        assert_eq!(handles.locker.releases(), 1);
    }

    #[test]
    fn cache_error_fallback_leaves_callback_ownership_to_pass_through() {
        // A cache I/O error on a hit routed to cache bumps the fallback
        // stats and hands the request to pass-through, but must NOT also
        // fire the callback itself: that would race (and, per
        // `Request::fire_callback`'s single-fire invariant, double-fire)
        // whatever outcome a real pass-through implementation produces.
        let (ctx, handles) = ctx_with_split_ratio(100);
        handles.io.set_cache_outcome(IoOutcome::Failure);
        let (cb, slot) = outcome_recorder();
        let req = Request::new(crate::request::Operation::Read, 0, 4096, hit_mapping(1), cb);
        read(req, ctx.clone());

        assert_eq!(handles.fallback.pass_through_reads.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.collab.stats.cache_errors.get(), 1);
        assert_eq!(ctx.collab.stats.fallbacks.get(), 1);
        // The engine itself never fired the callback; only a real
        // pass-through (not exercised by this mock) would.
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn scenario2_cache_hit_backend_selected_when_ratio_zero() {
        // Force ToBackend by making the controller's published ratio 0.
        // We can't mutate the controller's internals directly, so drive
        // it into a mode where the dispatcher consistently returns
        // ToBackend: a freshly constructed controller with data_admit
        // true and ratio 100 always yields ToCache, so instead exercise
        // the dispatcher bypass directly at this layer. Since `read`
        // always consults the live controller, assert via a dispatcher
        // pinned to a zero ratio instead.
        let (collab, handles) = mock_collaborators();
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        controller.signal_failure(); // irrelevant state, ensures no accidental mutation path
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

        // Directly exercise decide() through the context's dispatcher by
        // forcing a 0% split via repeated calls is awkward since the
        // controller always reports 100 at Idle; instead verify the
        // ToBackend branch of `dispatch` directly using a hand-built
        // request with load_admit_allowed pre-set.
        let (cb, slot) = outcome_recorder();
        let mut req = Request::new(crate::request::Operation::Read, 0, 4096, hit_mapping(1), cb);
        req.data_admit_allowed = true;
        req.load_admit_allowed = Some(LoadAdmitDecision::ToBackend);
        let req = Arc::new(req);
        dispatch(req, ctx.clone());

        assert_eq!(handles.io.cache_submits(), 0);
        assert_eq!(handles.io.backend_submits(), 1);
        assert_eq!(handles.locker.acquires(), 0);
        assert_eq!(*slot.lock().unwrap(), Some(RequestOutcome::Success));
    }

    #[test]
    fn scenario3_miss_promote_success_p3() {
        let (collab, handles) = mock_collaborators();
        handles.io.set_backend_outcome(IoOutcome::Success { data: Some(vec![7u8; 4096]) });
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

        let (cb, slot) = outcome_recorder();
        let mut req = Request::new(crate::request::Operation::Read, 0, 4096, miss_mapping(1), cb);
        req.data_admit_allowed = true;
        req.load_admit_allowed = Some(LoadAdmitDecision::ToBackend);
        let req = Arc::new(req);
        dispatch(req, ctx.clone());

        assert_eq!(*slot.lock().unwrap(), Some(RequestOutcome::Success));
        assert_eq!(handles.fallback.backfill_count(), 1);
        assert_eq!(handles.fallback.last_backfill(), Some(vec![7u8; 4096]));
        assert_eq!(handles.metadata.set_valid_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scenario4_miss_read_locked_switches_to_pass_through() {
        let (collab, handles) = mock_collaborators();
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

        let mut mapping = miss_mapping(1);
        mapping.lines[0].read_locked = true;
        let (cb, slot) = outcome_recorder();
        let mut req = Request::new(crate::request::Operation::Read, 0, 4096, mapping, cb);
        req.data_admit_allowed = true;
        req.load_admit_allowed = Some(LoadAdmitDecision::ToBackend);
        let req = Arc::new(req);
        dispatch(req, ctx.clone());

        assert_eq!(handles.fallback.pass_through_reads.load(Ordering::SeqCst), 1);
        assert_eq!(handles.metadata.set_valid_calls.load(Ordering::SeqCst), 0);
        assert_eq!(*slot.lock().unwrap(), Some(RequestOutcome::Success));
    }

    #[test]
    fn scenario5_miss_data_admit_false_no_promotion() {
        let (collab, handles) = mock_collaborators();
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

        let (cb, slot) = outcome_recorder();
        let mut req = Request::new(crate::request::Operation::Read, 0, 4096, miss_mapping(1), cb);
        req.data_admit_allowed = false;
        req.load_admit_allowed = Some(LoadAdmitDecision::ToBackend);
        let req = Arc::new(req);
        dispatch(req, ctx.clone());

        assert_eq!(handles.io.backend_submits(), 1);
        assert_eq!(handles.fallback.backfill_count(), 0);
        assert_eq!(*slot.lock().unwrap(), Some(RequestOutcome::Success));
    }

    #[test]
    fn promote_buffer_allocation_failure_invalidates_without_backfill() {
        let (collab, handles) = mock_collaborators();
        handles.buffers.set_should_fail(true);
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

        let (cb, slot) = outcome_recorder();
        let mut req = Request::new(crate::request::Operation::Read, 0, 4096, miss_mapping(1), cb);
        req.data_admit_allowed = true;
        req.load_admit_allowed = Some(LoadAdmitDecision::ToBackend);
        let req = Arc::new(req);
        dispatch(req, ctx.clone());

        assert_eq!(handles.io.backend_submits(), 0);
        assert_eq!(handles.fallback.invalidates.load(Ordering::SeqCst), 1);
        assert_eq!(handles.fallback.backfill_count(), 0);
        assert_eq!(
            *slot.lock().unwrap(),
            Some(RequestOutcome::Error(SplitcacheError::AllocationFailure))
        );
    }

    #[test]
    fn backend_error_on_promote_frees_buffer_before_invalidate_p4() {
        let (collab, handles) = mock_collaborators();
        handles.io.set_backend_outcome(IoOutcome::Failure);
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

        let (cb, slot) = outcome_recorder();
        let mut req = Request::new(crate::request::Operation::Read, 0, 4096, miss_mapping(1), cb);
        req.data_admit_allowed = true;
        req.load_admit_allowed = Some(LoadAdmitDecision::ToBackend);
        let req = Arc::new(req);
        dispatch(req, ctx.clone());

        assert_eq!(handles.fallback.backfill_count(), 0);
        assert_eq!(handles.fallback.invalidates.load(Ordering::SeqCst), 1);
        assert_eq!(
            *slot.lock().unwrap(),
            Some(RequestOutcome::Error(SplitcacheError::BackendIoError))
        );
    }

    #[test]
    fn deferred_lock_resumes_dispatch() {
        let (collab, handles) = mock_collaborators();
        handles.locker.set_mode(LockMode::Defer);
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

        let (cb, slot) = outcome_recorder();
        let req = Request::new(crate::request::Operation::Read, 0, 4096, hit_mapping(1), cb);
        read(req, ctx.clone());

        // Lock was deferred: nothing dispatched yet, callback not fired.
        assert_eq!(handles.io.cache_submits(), 0);
        assert!(slot.lock().unwrap().is_none());

        handles.locker.grant_pending();
        assert_eq!(handles.io.cache_submits(), 1);
        assert_eq!(*slot.lock().unwrap(), Some(RequestOutcome::Success));
    }

    #[test]
    fn lock_failure_completes_with_lock_error() {
        let (collab, handles) = mock_collaborators();
        handles.locker.set_mode(LockMode::Fail);
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));

        let (cb, slot) = outcome_recorder();
        let req = Request::new(crate::request::Operation::Read, 0, 4096, hit_mapping(1), cb);
        read(req, ctx);

        assert_eq!(
            *slot.lock().unwrap(),
            Some(RequestOutcome::Error(SplitcacheError::LockError(LockKind::Read)))
        );
    }

    #[test]
    fn pending_read_misses_blocked_forwards_to_pass_through() {
        let (collab, handles) = mock_collaborators();
        let tunables = Tunables::default();
        let controller = Arc::new(SplitController::new(tunables.clone(), crate::bandwidth::BandwidthTable::default_table()));
        let dispatcher = Dispatcher::new(&tunables);
        let ctx = Arc::new(EngineContext::new(collab, controller, dispatcher));
        ctx.pending_read_misses_blocked.store(true, Ordering::SeqCst);

        let counted = Arc::new(AtomicUsize::new(0));
        let counted2 = counted.clone();
        let req = Request::new(crate::request::Operation::Read, 0, 4096, miss_mapping(1), move |_| {
            counted2.fetch_add(1, Ordering::SeqCst);
        });
        read(req, ctx.clone());

        assert_eq!(handles.fallback.pass_through_reads.load(Ordering::SeqCst), 1);
        assert_eq!(handles.io.backend_submits(), 0);
        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }
}
