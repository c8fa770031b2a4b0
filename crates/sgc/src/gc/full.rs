//! Full GC - Stop-the-World Mark-Compact
//!
//! The collector of last resort. It runs when degeneration is not
//! allowed, when a degenerated cycle upgrades, and for explicit GC
//! requests that do not go concurrent. It cannot be cancelled.
//!
//! Steps, in one pause:
//! 1. Abandon any concurrent marking and clear the evacuation OOM state
//! 2. If forwarded objects exist, normalise: every slot and root is
//!    resolved and cset regions go back to Regular
//! 3. Mark from all roots; class unloading follows `ClassUnloading`
//! 4. Clean weak roots, unload classes
//! 5. Sliding compaction

use super::concurrent::{notify_unloaded, process_weak_roots};
use super::{CycleScope, GcCause, GcPhase, GcStateFlags, HeapState};
use crate::marker::{RootScanner, RootScope};
use crate::relocate;
use crate::runtime::classes::UnloadedLoader;
use crate::stats::CycleKind;
use crate::verifier::VerifyPoint;

/// Run a Full GC on the control thread
pub(crate) fn run(state: &HeapState, cause: GcCause) {
    let scope = CycleScope::begin(state, CycleKind::Full, cause);
    let unloaded = state.pause(GcPhase::Full, || full_gc_work(state));
    notify_unloaded(state, &unloaded);
    complete(state, scope);
}

/// Record a finished Full GC, including one upgraded from a degenerated cycle
pub(crate) fn complete(state: &HeapState, scope: CycleScope) {
    let progress = scope.metrics().is_good_progress(state);
    state.set_progress_last_gc(progress);
    state.heuristics().record_success_full();
    state.policy.record_success_full();
    state.heap.reset_bytes_allocated_since_gc_start();
    scope.end(state, CycleKind::Full);
}

/// Full GC body; runs inside a pause
///
/// # Returns
/// Loaders unloaded by the Full GC marking
pub(crate) fn full_gc_work(state: &HeapState) -> Vec<UnloadedLoader> {
    let heap = &state.heap;
    state.clear_cancelled();
    state.verify(VerifyPoint::BeforeFullGc);

    if state.gc_state.is_marking() {
        state.marker.abandon(state);
    }
    state.evac_oom.clear();
    if state.gc_state.has_forwarded() {
        normalise_forwarding(state);
    }
    state.gc_state.clear();

    // Mark
    state.recycle_trash();
    state.marker.reset(heap);
    state.marker.start(heap, state.config.class_unloading);
    state.marker.mark_roots(state);
    state.marker.mark_loop(state, &state.parallel_workers, false);
    let unloaded = process_weak_roots(state);

    // Compact
    let stats = relocate::compact(state, &state.parallel_workers);
    state.stats.record_reclaimed(
        stats.regions_freed * heap.region_bytes(),
        stats.regions_freed + stats.humongous_reclaimed,
    );
    state.verify(VerifyPoint::AfterFullGc);
    unloaded
}

/// Make every slot and root point at canonical copies, and return cset
/// regions to Regular
///
/// Only slots into the cset can hold a stale reference; regions outside
/// it may contain recycled garbage, so nothing else is resolved.
fn normalise_forwarding(state: &HeapState) {
    let heap = &state.heap;
    let mut healed = 0;
    for r in heap.regions().iter().filter(|r| r.is_active()) {
        heap.walk_region(r, r.top(), |obj, _| {
            if heap.is_forwarded(obj) {
                return;
            }
            for i in 0..heap.shape(obj).refs as usize {
                let v = heap.load_ref_slot(obj, i);
                if heap.in_cset(v) {
                    let fwd = heap.resolve(v);
                    if fwd != v {
                        heap.store_ref_slot(obj, i, fwd);
                        healed += 1;
                    }
                }
            }
        });
    }

    let scanner = RootScanner::new(&state.threads, &state.globals, &state.classes, &state.strings);
    scanner.oops_do(RootScope::All, |slot| *slot = heap.resolve(*slot));

    let cset = heap.collection_set();
    for idx in cset.region_indices() {
        if let Err(e) = heap.region(idx).make_regular_bypass() {
            log::error!(target: "sgc", "Full GC: {}", e);
        }
    }
    cset.clear();
    state.gc_state.set(
        GcStateFlags::EVACUATION | GcStateFlags::UPDATEREFS | GcStateFlags::HAS_FORWARDED,
        false,
    );
    log::debug!(target: "sgc", "Full GC normalised {} forwarded references", healed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{AllocRequest, AllocType, Lab};
    use crate::config::{GcConfig, KB};
    use crate::object::{ClassId, Klass, ObjKind, ObjRef, Shape};

    fn state() -> HeapState {
        HeapState::new(GcConfig {
            max_heap_size: 16 * 64 * KB,
            initial_heap_size: 16 * 64 * KB,
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
    fn test_full_gc_keeps_graph_and_frees_garbage() {
        let state = state();
        let garbage = alloc(&state, 0, 200);
        let a = alloc(&state, 1, 1);
        let b = alloc(&state, 0, 1);
        state.heap.store_ref_slot(a, 0, b);
        state.heap.store_prim(b, 0, 99);
        let h = state.globals.create(a);

        run(&state, GcCause::SystemGc);

        let a2 = state.globals.get(h).unwrap();
        assert_eq!(a2, garbage, "live objects slid to the bottom");
        let b2 = state.heap.load_ref_slot(a2, 0);
        assert_eq!(state.heap.load_prim(b2, 0), 99);
        assert_eq!(state.heap.used(), (5 + 4) * 8);
        assert_eq!(state.stats.cycles(CycleKind::Full), 1);
        assert_eq!(state.policy.success_full(), 1);
    }

    #[test]
    fn test_full_gc_normalises_interrupted_evacuation() {
        // Arrange: `a` is forwarded, the holder still points at the old copy
        let state = state();
        let holder = alloc(&state, 1, 0);
        let h = state.globals.create(holder);
        let mut req = AllocRequest::for_shared(state.heap.region_words());
        let addr = state.heap.allocate(&mut req).unwrap();
        let a = state.heap.init_object(addr, Klass::new(ClassId::OBJECT, ObjKind::Instance), Shape::new(0, 1));
        state.heap.fill_with_filler(addr + 4, state.heap.region_words() - 4);
        state.heap.store_prim(a, 0, 5);
        state.heap.store_ref_slot(holder, 0, a);

        let r = state.heap.region_of(a);
        r.make_cset().unwrap();
        state.heap.collection_set().add_region(r);
        state
            .gc_state
            .set(GcStateFlags::EVACUATION | GcStateFlags::HAS_FORWARDED, true);
        let mut lab = Lab::new(AllocType::Gclab);
        relocate::evacuate_object(&state, &mut lab, a);
        lab.retire(&state.heap);

        // Act
        run(&state, GcCause::UpgradeToFull);

        // Assert
        assert_eq!(state.gc_state.raw(), 0);
        assert!(state.heap.collection_set().is_empty());
        let holder = state.globals.get(h).unwrap();
        let a2 = state.heap.load_ref_slot(holder, 0);
        assert_eq!(state.heap.load_prim(a2, 0), 5);
        assert!(!state.heap.is_forwarded(a2));
    }
}
