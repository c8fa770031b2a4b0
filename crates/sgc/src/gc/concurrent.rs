//! Concurrent Cycle - Mark, Evacuate, Update References
//!
//! ```text
//!  Concurrent Reset ─▶ Init Mark ─▶ Concurrent Mark ─▶ Final Mark
//!        (conc)         (pause)          (conc)          (pause)
//!                                                           │
//!      ┌────────────────────────────────────────────────────┘
//!      ▼
//!  Cleanup Early ─▶ Evacuation ─▶ Init Update Refs ─▶ Update Refs
//!      (conc)         (conc)          (pause)            (conc)
//!                                                           │
//!                    Cleanup ◀── Final Update Refs ◀────────┘
//!                    (conc)          (pause)
//! ```
//!
//! Every concurrent phase checks for cancellation when it ends. A
//! cancelled cycle records where it stopped so the degenerated GC can
//! pick up from there; the pause work below is shared with it.

use super::{CycleScope, DegenPoint, GcCause, GcPhase, GcStateFlags, HeapState};
use crate::logging::GcEvent;
use crate::relocate::{self, evacuate_roots};
use crate::runtime::classes::UnloadedLoader;
use crate::stats::CycleKind;
use crate::verifier::VerifyPoint;

/// How a concurrent cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Cancelled(GcCause),
}

/// Run one concurrent cycle on the control thread
pub(crate) fn run(state: &HeapState, cause: GcCause) -> CycleOutcome {
    let scope = CycleScope::begin(state, CycleKind::Concurrent, cause);
    state.heap.reset_bytes_allocated_since_gc_start();

    state.concurrent_phase(GcPhase::ConcurrentReset, || {
        state.recycle_trash();
        state.marker.reset(&state.heap);
    });
    if let Some(outcome) = check_cancelled(state, &scope, DegenPoint::OutsideCycle) {
        return outcome;
    }

    let unload = state.heuristics().should_unload_classes();
    state.pause(GcPhase::InitMark, || init_mark_work(state, unload));

    state.concurrent_phase(GcPhase::ConcurrentMark, || {
        state
            .marker
            .mark_loop(state, &state.concurrent_workers, true)
    });
    if let Some(outcome) = check_cancelled(state, &scope, DegenPoint::Mark) {
        return outcome;
    }

    let unloaded = state.pause(GcPhase::FinalMark, || final_mark_work(state));
    notify_unloaded(state, &unloaded);

    state.concurrent_phase(GcPhase::ConcurrentCleanupEarly, || state.recycle_trash());

    if state.gc_state.is_evacuating() {
        state.concurrent_phase(GcPhase::ConcurrentEvac, || {
            relocate::evacuate_collection_set(state, &state.concurrent_workers, true)
        });
        if let Some(outcome) = check_cancelled(state, &scope, DegenPoint::Evac) {
            return outcome;
        }

        state.pause(GcPhase::InitUpdateRefs, || init_update_refs_work(state));

        state.concurrent_phase(GcPhase::ConcurrentUpdateRefs, || {
            relocate::update_heap_references(state, &state.concurrent_workers, true)
        });
        if let Some(outcome) = check_cancelled(state, &scope, DegenPoint::UpdateRefs) {
            return outcome;
        }

        state.pause(GcPhase::FinalUpdateRefs, || final_update_refs_work(state));
        state.concurrent_phase(GcPhase::ConcurrentCleanup, || state.recycle_trash());
    }

    state.heuristics().record_success_concurrent();
    state.policy.record_success_concurrent();
    state.set_progress_last_gc(true);
    scope.end(state, CycleKind::Concurrent);
    CycleOutcome::Completed
}

/// Record the degeneration point if the cycle was cancelled
fn check_cancelled(state: &HeapState, scope: &CycleScope, point: DegenPoint) -> Option<CycleOutcome> {
    let cause = state.cancel_cause()?;
    state.set_degen_point(point);
    state.stats.record_cancelled();
    state.pacer.setup_for_idle();
    log::warn!(
        target: "sgc",
        "GC({}) Cancelled at {}: {}",
        scope.cycle(),
        point.name(),
        cause
    );
    state.logger.log(GcEvent::Cancelled {
        cycle: scope.cycle(),
        cause: cause.name().to_string(),
    });
    Some(CycleOutcome::Cancelled(cause))
}

// ============================================================================
// PAUSE WORK (shared with the degenerated cycle)
// ============================================================================

/// Init mark: TAMS, strong roots, MARKING on
pub(crate) fn init_mark_work(state: &HeapState, unload_classes: bool) {
    state.verify(VerifyPoint::BeforeMark);
    let epoch = state.marker.start(&state.heap, unload_classes);
    state.satb.set_active(true);
    state.gc_state.set(GcStateFlags::MARKING, true);
    let roots = state.marker.mark_roots(state);
    log::debug!(
        target: "sgc",
        "Init mark: epoch {}, {} roots, class unloading {}",
        epoch,
        roots.total(),
        if unload_classes { "on" } else { "off" }
    );

    let used_words = state.heap.used() / 8;
    let free_words = state.heap.available() / 8;
    state.pacer.setup("mark", used_words, free_words);
}

/// Final mark: finish marking, clean weak roots, unload classes, choose
/// the collection set and evacuate roots
///
/// # Returns
/// Loaders unloaded by this marking; listeners are notified after the pause
pub(crate) fn final_mark_work(state: &HeapState) -> Vec<UnloadedLoader> {
    let heap = &state.heap;
    state.marker.finish(state, &state.parallel_workers);
    state.satb.set_active(false);
    state.gc_state.set(GcStateFlags::MARKING, false);
    state.marker.account_above_tams(heap);

    let unloaded = process_weak_roots(state);
    state.verify(VerifyPoint::AfterMark);

    choose_collection_set(state);
    state.rebuild_free_set();

    if !heap.collection_set().is_empty() {
        state
            .gc_state
            .set(GcStateFlags::EVACUATION | GcStateFlags::HAS_FORWARDED, true);
        evacuate_roots(state);
        state.verify(VerifyPoint::AfterEvacRoots);

        let live_words = heap.collection_set().live() / 8;
        state
            .pacer
            .setup("evacuation", live_words, heap.available() / 8);
    }
    unloaded
}

/// Drop dead interned strings and unload unclaimed loaders
pub(crate) fn process_weak_roots(state: &HeapState) -> Vec<UnloadedLoader> {
    let heap = &state.heap;
    let dead_strings = state.strings.unlink_dead(|obj| heap.is_marked(obj));
    if dead_strings > 0 {
        log::debug!(target: "sgc", "Unlinked {} dead interned strings", dead_strings);
    }
    if state.marker.unload_classes() {
        state.classes.unload(state.marker.epoch())
    } else {
        Vec::new()
    }
}

/// Trash immediate garbage and move the heuristics' choice into the cset
pub(crate) fn choose_collection_set(state: &HeapState) {
    let heap = &state.heap;
    let regions = state.region_data();
    let snapshot = state.snapshot();
    let selection = state.heuristics().choose_collection_set(&regions, &snapshot);

    let mut immediate_regions = 0;
    for idx in &selection.immediate {
        if heap.region(*idx).make_trash().is_ok() {
            immediate_regions += 1;
        }
    }
    state
        .stats
        .record_reclaimed(selection.immediate_garbage, immediate_regions);

    let cset = heap.collection_set();
    for idx in &selection.cset {
        let r = heap.region(*idx);
        match r.make_cset() {
            Ok(()) => cset.add_region(r),
            Err(e) => log::warn!(target: "sgc", "Skipping cset candidate: {}", e),
        }
    }

    log::debug!(
        target: "sgc",
        "Collection set: {} regions, {}K garbage, {}K live; immediate: {} regions, {}K",
        cset.count(),
        cset.garbage() / 1024,
        cset.live() / 1024,
        immediate_regions,
        selection.immediate_garbage / 1024
    );
    state.logger.log(GcEvent::CollectionSet {
        regions: cset.count(),
        garbage: cset.garbage(),
        live: cset.live(),
        immediate_regions,
        immediate_garbage: selection.immediate_garbage,
    });
}

/// Init update refs: evacuation is over, record update watermarks
pub(crate) fn init_update_refs_work(state: &HeapState) {
    let heap = &state.heap;
    state.gc_state.set(GcStateFlags::EVACUATION, false);
    state.gc_state.set(GcStateFlags::UPDATEREFS, true);
    for r in heap.regions() {
        if r.is_active() && !r.is_cset() {
            r.set_update_watermark(r.top());
        }
    }
    state
        .pacer
        .setup("update refs", heap.used() / 8, heap.available() / 8);
}

/// Final update refs: heal roots, trash the cset, forwarding is over
pub(crate) fn final_update_refs_work(state: &HeapState) {
    let heap = &state.heap;
    let roots = relocate::update_roots(state);

    let cset = heap.collection_set();
    let mut trashed = 0;
    for idx in cset.region_indices() {
        if heap.region(idx).make_trash().is_ok() {
            trashed += 1;
        }
    }
    state.stats.record_reclaimed(cset.garbage(), trashed);
    cset.clear();

    state
        .gc_state
        .set(GcStateFlags::HAS_FORWARDED | GcStateFlags::UPDATEREFS, false);
    state.rebuild_free_set();
    log::debug!(
        target: "sgc",
        "Final update refs: {} roots updated, {} cset regions trashed",
        roots,
        trashed
    );
    state.verify(VerifyPoint::AfterUpdateRefs);
}

/// Tell listeners and the log about unloaded loaders
pub(crate) fn notify_unloaded(state: &HeapState, unloaded: &[UnloadedLoader]) {
    if unloaded.is_empty() {
        return;
    }
    let classes = unloaded.iter().map(|l| l.classes.len()).sum();
    log::info!(
        target: "sgc",
        "Unloaded {} class loaders, {} classes",
        unloaded.len(),
        classes
    );
    state.logger.log(GcEvent::ClassUnload {
        loaders: unloaded.len(),
        classes,
    });
    state.classes.notify_unloaded(unloaded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocRequest;
    use crate::config::{GcConfig, KB};
    use crate::object::{ClassId, Klass, ObjKind, ObjRef, Shape};

    fn state() -> HeapState {
        HeapState::new(GcConfig {
            max_heap_size: 32 * 64 * KB,
            initial_heap_size: 32 * 64 * KB,
            region_size: Some(64 * KB),
            min_tlab_size: KB,
            conc_gc_threads: Some(2),
            parallel_gc_threads: Some(2),
            verify: true,
            ..Default::default()
        })
        .unwrap()
    }

    fn alloc(state: &HeapState, refs: usize, prims: usize) -> ObjRef {
        let shape = Shape::new(refs, prims);
        let mut req = AllocRequest::for_shared(shape.size_words());
        let addr = state.heap.allocate(&mut req).unwrap();
        state
            .heap
            .init_object(addr, Klass::new(ClassId::OBJECT, ObjKind::Instance), shape)
    }

    #[test]
    fn test_cycle_without_mutators_reclaims_garbage() {
        let state = state();
        let live = alloc(&state, 1, 1);
        state.heap.store_prim(live, 0, 42);
        let h = state.globals.create(live);
        // A region of garbage
        for _ in 0..100 {
            alloc(&state, 0, 100);
        }
        let used_before = state.heap.used();

        assert_eq!(run(&state, GcCause::ConcurrentRequest), CycleOutcome::Completed);

        let root = state.globals.get(h).unwrap();
        assert_eq!(state.heap.load_prim(root, 0), 42);
        assert!(state.heap.used() < used_before);
        assert_eq!(state.gc_state.raw(), 0);
        assert_eq!(state.stats.cycles(CycleKind::Concurrent), 1);
        assert!(state.heap.collection_set().is_empty());
    }

    #[test]
    fn test_cancel_before_cycle_records_outside_cycle() {
        let state = state();
        state.cancel_gc(GcCause::AllocationFailure);

        let outcome = run(&state, GcCause::Heuristics);

        assert_eq!(outcome, CycleOutcome::Cancelled(GcCause::AllocationFailure));
        assert_eq!(state.take_degen_point(), DegenPoint::OutsideCycle);
        assert_eq!(state.stats.cycles(CycleKind::Concurrent), 0);
    }
}
