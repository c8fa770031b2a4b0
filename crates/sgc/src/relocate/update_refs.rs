//! Update References - Healing Slots That Point Into the Collection Set
//!
//! After evacuation every live cset object has a forwardee. Concurrent
//! update refs walks the live objects of every active non-cset region up
//! to the region's update watermark (its top at init update refs) and
//! swaps each slot that points into the cset for the forwardee.
//!
//! Objects above the watermark were allocated after evacuation finished;
//! the storeval barrier already stored resolved references into them.
//!
//! A slot is healed with a CAS, so a racing mutator store always wins.

use crate::gc::HeapState;
use crate::marker::gc_threads::WorkGang;
use crate::marker::{RootScanner, RootScope};
use crate::object::ObjRef;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Heal every heap slot that points into the collection set
///
/// # Returns
/// True if the pass finished; false if it stopped on cancellation
pub fn update_heap_references(state: &HeapState, gang: &WorkGang, cancellable: bool) -> bool {
    let heap = &state.heap;
    let next = AtomicUsize::new(0);
    let updated = AtomicUsize::new(0);

    gang.run_task(gang.max_workers(), |_| {
        let mut local = 0;
        loop {
            if cancellable && state.is_cancelled() {
                break;
            }
            let idx = next.fetch_add(1, Ordering::Relaxed);
            if idx >= heap.region_count() {
                break;
            }
            let r = heap.region(idx);
            if !r.is_active() || r.is_cset() {
                continue;
            }
            heap.walk_live_objects(r, r.update_watermark(), |obj, _| {
                local += update_object(state, obj);
            });
            state.pacer.report_progress(r.used_words());
        }
        updated.fetch_add(local, Ordering::Relaxed);
    });

    log::debug!(
        target: "sgc",
        "Updated {} references",
        updated.load(Ordering::Relaxed)
    );
    !(cancellable && state.is_cancelled())
}

/// Heal the reference slots of one object
///
/// # Returns
/// Slots rewritten
fn update_object(state: &HeapState, obj: ObjRef) -> usize {
    let heap = &state.heap;
    let mut count = 0;
    for i in 0..heap.shape(obj).refs as usize {
        let v = heap.load_ref_slot(obj, i);
        if !heap.in_cset(v) {
            continue;
        }
        let fwd = heap.resolve(v);
        if fwd != v && heap.cas_ref_slot(obj, i, v, fwd).is_ok() {
            count += 1;
        }
    }
    count
}

/// Point every root at its canonical copy; inside a pause
pub fn update_roots(state: &HeapState) -> usize {
    let heap = &state.heap;
    let scanner = RootScanner::new(&state.threads, &state.globals, &state.classes, &state.strings);
    let mut updated = 0;
    scanner.oops_do(RootScope::All, |slot| {
        let fwd = heap.resolve(*slot);
        if fwd != *slot {
            *slot = fwd;
            updated += 1;
        }
    });
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{AllocRequest, AllocType, Lab};
    use crate::config::{GcConfig, KB};
    use crate::gc::GcStateFlags;
    use crate::object::{ClassId, Klass, ObjKind, Shape};
    use crate::relocate::evacuate_object;

    fn state() -> HeapState {
        HeapState::new(GcConfig {
            max_heap_size: 16 * 64 * KB,
            initial_heap_size: 16 * 64 * KB,
            region_size: Some(64 * KB),
            min_tlab_size: KB,
            conc_gc_threads: Some(2),
            parallel_gc_threads: Some(2),
            ..Default::default()
        })
        .unwrap()
    }

    fn alloc_in_region(state: &HeapState, region: usize, offset: usize, refs: usize) -> ObjRef {
        let heap = &state.heap;
        let r = heap.region(region);
        let addr = r.bottom() + offset;
        let shape = Shape::new(refs, 1);
        heap.init_object(addr, Klass::new(ClassId::OBJECT, ObjKind::Instance), shape)
    }

    #[test]
    fn test_heals_slots_below_watermark() {
        let state = state();
        let heap = &state.heap;
        // Two regions filled by one shared request each
        let mut req = AllocRequest::for_shared(64);
        let base_a = heap.allocate(&mut req).unwrap();
        let target_region = heap.region_index_of_addr(base_a);
        let mut req = AllocRequest::for_shared(heap.region_words());
        let base_b = heap.allocate(&mut req).unwrap();
        let holder_region = heap.region_index_of_addr(base_b);
        assert_ne!(target_region, holder_region);

        let target = alloc_in_region(&state, target_region, 0, 0);
        heap.fill_with_filler(target.addr() + 4, 60);
        let holder = alloc_in_region(&state, holder_region, 0, 2);
        heap.fill_with_filler(holder.addr() + 6, heap.region_words() - 6);
        heap.store_ref_slot(holder, 0, target);

        // Everything counts as live: TAMS stays at bottom
        let t = heap.region(target_region);
        t.make_cset().unwrap();
        heap.collection_set().add_region(t);
        state.gc_state.set(GcStateFlags::HAS_FORWARDED, true);
        let mut lab = Lab::new(AllocType::Gclab);
        let copy = evacuate_object(&state, &mut lab, target);
        lab.retire(heap);

        let h = heap.region(holder_region);
        h.set_update_watermark(h.top());
        assert!(update_heap_references(&state, &state.concurrent_workers, true));
        assert_eq!(heap.load_ref_slot(holder, 0), copy);
        assert_eq!(heap.load_ref_slot(holder, 1), ObjRef::NULL);
    }

    #[test]
    fn test_update_roots_resolves_globals() {
        let state = state();
        let heap = &state.heap;
        let mut req = AllocRequest::for_shared(8);
        let addr = heap.allocate(&mut req).unwrap();
        let obj = heap.init_object(addr, Klass::new(ClassId::OBJECT, ObjKind::Instance), Shape::new(0, 1));
        let h = state.globals.create(obj);
        let mut lab = Lab::new(AllocType::Gclab);
        let copy = evacuate_object(&state, &mut lab, obj);

        assert_eq!(update_roots(&state), 1);
        assert_eq!(state.globals.get(h).unwrap(), copy);
        assert_eq!(update_roots(&state), 0);
    }
}
