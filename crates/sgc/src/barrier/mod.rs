//! Barrier Module - SATB and Brooks-Style Access Barriers
//!
//! Mutators never touch a heap slot directly; every access goes through the
//! barriers below, each of which is a function of the reference and the
//! current GC phase flags.
//!
//! Barriers:
//! - SATB pre-barrier (MARKING): log the old value of an overwritten slot
//!   so the snapshot at init mark stays reachable for the marker
//! - Write barrier (EVACUATION): the object being written must not be a
//!   from-space copy; if it is still in the cset it is evacuated first
//! - Storeval (HAS_FORWARDED): stored references are resolved
//! - Read barrier (HAS_FORWARDED): reads go to the canonical copy
//! - CAS barrier (HAS_FORWARDED): compare canonical copies, so a stale
//!   from-space value never fails a CAS that should succeed
//! - Acmp barrier (HAS_FORWARDED): reference equality on canonical copies
//! - Clone barrier (HAS_FORWARDED): fields copied into a clone are resolved
//!
//! Each barrier is switched by its own flag. With a flag off the access is
//! a plain load or store; that is only safe where no concurrent relocation
//! happens, which is why concurrent modes require every barrier.
//!
//! ```text
//!   store_ref(obj, i, v):
//!       obj' = write_barrier(obj)        // may evacuate
//!       v'   = storeval(v)
//!       satb_pre_barrier(obj'.slot[i])   // old value while marking
//!       obj'.slot[i] = v'
//! ```

pub mod stats;

pub use stats::{BarrierKind, BarrierStats, BarrierStatsSnapshot};

use crate::gc::HeapState;
use crate::object::ObjRef;
use crate::relocate;
use crate::runtime::threads::ThreadState;

// ============================================================================
// SINGLE BARRIERS
// ============================================================================

/// Log `prev` into the thread's SATB buffer while marking
#[inline]
pub fn satb_pre_barrier(state: &HeapState, thread: &ThreadState, prev: ObjRef) {
    if !state.config.barriers.satb || !state.gc_state.is_marking() {
        return;
    }
    state.barrier_stats.record_invocation(BarrierKind::Satb);
    enqueue_if_unmarked(state, thread, prev);
}

/// Keep `obj` alive for the running marking
///
/// Used by string-table lookups and allocations that resurrect a weakly
/// held object.
#[inline]
pub fn keep_alive(state: &HeapState, thread: &ThreadState, obj: ObjRef) {
    if state.gc_state.is_marking() {
        enqueue_if_unmarked(state, thread, obj);
    }
}

fn enqueue_if_unmarked(state: &HeapState, thread: &ThreadState, obj: ObjRef) {
    if obj.is_null() || state.heap.is_marked(obj) {
        return;
    }
    state.satb.enqueue(&mut thread.satb.lock(), obj);
    state.barrier_stats.record_satb_enqueue();
}

/// Object a write to `obj` must go to
///
/// During evacuation an unforwarded cset object is copied here, so no
/// write ever lands in from-space.
#[inline]
pub fn write_barrier(state: &HeapState, thread: &ThreadState, obj: ObjRef) -> ObjRef {
    if obj.is_null() || !state.config.barriers.write || !state.gc_state.has_forwarded() {
        return obj;
    }
    state.barrier_stats.record_invocation(BarrierKind::Write);
    let resolved = state.heap.resolve(obj);
    if state.gc_state.is_evacuating() && state.heap.in_cset(resolved) {
        state.barrier_stats.record_evacuation();
        return relocate::evacuate_object(state, &mut thread.gclab.lock(), resolved);
    }
    if resolved != obj {
        state.barrier_stats.record_resolved();
    }
    resolved
}

/// Value to store into a slot
#[inline]
pub fn storeval_barrier(state: &HeapState, value: ObjRef) -> ObjRef {
    if value.is_null() || !state.config.barriers.write || !state.gc_state.has_forwarded() {
        return value;
    }
    state.heap.resolve(value)
}

/// Canonical copy to read from
#[inline]
pub fn read_barrier(state: &HeapState, obj: ObjRef) -> ObjRef {
    if obj.is_null() || !state.config.barriers.read || !state.gc_state.has_forwarded() {
        return obj;
    }
    state.barrier_stats.record_invocation(BarrierKind::Read);
    let resolved = state.heap.resolve(obj);
    if resolved != obj {
        state.barrier_stats.record_resolved();
    }
    resolved
}

/// Reference equality
#[inline]
pub fn acmp_barrier(state: &HeapState, a: ObjRef, b: ObjRef) -> bool {
    if a == b {
        return true;
    }
    if !state.config.barriers.acmp || !state.gc_state.has_forwarded() {
        return false;
    }
    state.barrier_stats.record_invocation(BarrierKind::Acmp);
    state.heap.resolve(a) == state.heap.resolve(b)
}

/// Resolve every reference copied into a fresh clone
pub fn clone_barrier(state: &HeapState, copy: ObjRef) {
    if !state.config.barriers.clone || !state.gc_state.has_forwarded() {
        return;
    }
    state.barrier_stats.record_invocation(BarrierKind::Clone);
    let heap = &state.heap;
    for i in 0..heap.shape(copy).refs as usize {
        let v = heap.load_ref_slot(copy, i);
        if v.is_null() {
            continue;
        }
        let r = heap.resolve(v);
        if r != v {
            heap.store_ref_slot(copy, i, r);
        }
    }
}

// ============================================================================
// COMPOSED FIELD ACCESS
// ============================================================================

/// Barriered reference load of `obj.slot[index]`
pub fn load_ref_field(state: &HeapState, obj: ObjRef, index: usize) -> ObjRef {
    let obj = read_barrier(state, obj);
    state.heap.load_ref_slot(obj, index)
}

/// Barriered reference store of `value` into `obj.slot[index]`
pub fn store_ref_field(state: &HeapState, thread: &ThreadState, obj: ObjRef, index: usize, value: ObjRef) {
    let obj = write_barrier(state, thread, obj);
    let value = storeval_barrier(state, value);
    if state.gc_state.is_marking() {
        satb_pre_barrier(state, thread, state.heap.load_ref_slot(obj, index));
    }
    state.heap.store_ref_slot(obj, index, value);
}

/// Barriered compare-and-swap of `obj.slot[index]`
///
/// # Returns
/// * `Ok(previous)` - the swap happened
/// * `Err(current)` - the slot did not hold (a copy of) `expected`
pub fn cas_ref_field(
    state: &HeapState,
    thread: &ThreadState,
    obj: ObjRef,
    index: usize,
    expected: ObjRef,
    new: ObjRef,
) -> Result<ObjRef, ObjRef> {
    let heap = &state.heap;
    let obj = write_barrier(state, thread, obj);
    let new = storeval_barrier(state, new);
    if state.gc_state.is_marking() {
        satb_pre_barrier(state, thread, heap.load_ref_slot(obj, index));
    }

    if !state.config.barriers.cas || !state.gc_state.has_forwarded() {
        return heap.cas_ref_slot(obj, index, expected, new);
    }
    state.barrier_stats.record_invocation(BarrierKind::Cas);
    let expected = heap.resolve(expected);
    loop {
        let current = heap.load_ref_slot(obj, index);
        if heap.resolve(current) != expected {
            return Err(current);
        }
        match heap.cas_ref_slot(obj, index, current, new) {
            Ok(prev) => return Ok(prev),
            Err(_) => state.barrier_stats.record_cas_retry(),
        }
    }
}

/// Barriered primitive load
pub fn load_prim_field(state: &HeapState, obj: ObjRef, index: usize) -> u64 {
    let obj = read_barrier(state, obj);
    state.heap.load_prim(obj, index)
}

/// Barriered primitive store
pub fn store_prim_field(state: &HeapState, thread: &ThreadState, obj: ObjRef, index: usize, value: u64) {
    let obj = write_barrier(state, thread, obj);
    state.heap.store_prim(obj, index, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocRequest;
    use crate::config::{GcConfig, KB};
    use crate::gc::GcStateFlags;
    use crate::object::{ClassId, Klass, MarkWord, ObjKind, Shape};

    fn state() -> HeapState {
        HeapState::new(GcConfig {
            max_heap_size: 16 * 64 * KB,
            initial_heap_size: 16 * 64 * KB,
            region_size: Some(64 * KB),
            min_tlab_size: KB,
            conc_gc_threads: Some(1),
            parallel_gc_threads: Some(1),
            ..Default::default()
        })
        .unwrap()
    }

    fn alloc(state: &HeapState, refs: usize) -> ObjRef {
        let shape = Shape::new(refs, 1);
        let mut req = AllocRequest::for_shared(shape.size_words());
        let addr = state.heap.allocate(&mut req).unwrap();
        state
            .heap
            .init_object(addr, Klass::new(ClassId::OBJECT, ObjKind::Instance), shape)
    }

    /// Forward `from` to a fresh object by hand
    fn forward(state: &HeapState, from: ObjRef) -> ObjRef {
        let to = alloc(state, state.heap.shape(from).refs as usize);
        state.heap.set_mark(from, MarkWord::Forwarded(to));
        state.gc_state.set(GcStateFlags::HAS_FORWARDED, true);
        to
    }

    #[test]
    fn test_satb_logs_overwritten_value_only_while_marking() {
        let state = state();
        let t = state.threads.register("main");
        let holder = alloc(&state, 1);
        let old = alloc(&state, 0);
        let new = alloc(&state, 0);
        state.heap.store_ref_slot(holder, 0, old);

        store_ref_field(&state, &t, holder, 0, new);
        assert_eq!(state.satb.enqueued(), 0);

        state.marker.start(&state.heap, false);
        state.satb.set_active(true);
        state.gc_state.set(GcStateFlags::MARKING, true);
        store_ref_field(&state, &t, holder, 0, old);
        assert_eq!(t.satb.lock().as_slice(), &[new]);
    }

    #[test]
    fn test_read_and_acmp_resolve_forwarded() {
        let state = state();
        let from = alloc(&state, 0);
        state.heap.store_prim(from, 0, 7);
        let to = forward(&state, from);
        state.heap.store_prim(to, 0, 8);

        assert_eq!(read_barrier(&state, from), to);
        assert_eq!(load_prim_field(&state, from, 0), 8);
        assert!(acmp_barrier(&state, from, to));
    }

    #[test]
    fn test_disabled_barriers_are_plain_accesses() {
        let mut config = GcConfig {
            max_heap_size: 16 * 64 * KB,
            initial_heap_size: 16 * 64 * KB,
            region_size: Some(64 * KB),
            ..Default::default()
        };
        config.barriers.read = false;
        config.barriers.acmp = false;
        let state = HeapState::new(config).unwrap();
        let from = alloc(&state, 0);
        let to = forward(&state, from);

        assert_eq!(read_barrier(&state, from), from);
        assert!(!acmp_barrier(&state, from, to));
    }

    #[test]
    fn test_cas_succeeds_against_stale_expected_value() {
        let state = state();
        let t = state.threads.register("main");
        let holder = alloc(&state, 1);
        let target = alloc(&state, 0);
        state.heap.store_ref_slot(holder, 0, target);
        let copy = forward(&state, target);
        let replacement = alloc(&state, 0);

        // Slot holds the from-space copy; expected names the to-space copy
        let result = cas_ref_field(&state, &t, holder, 0, copy, replacement);
        assert_eq!(result, Ok(target));
        assert_eq!(state.heap.load_ref_slot(holder, 0), replacement);

        let result = cas_ref_field(&state, &t, holder, 0, copy, ObjRef::NULL);
        assert_eq!(result, Err(replacement));
    }

    #[test]
    fn test_clone_barrier_resolves_copied_fields() {
        let state = state();
        let clone = alloc(&state, 2);
        let target = alloc(&state, 0);
        state.heap.store_ref_slot(clone, 1, target);
        let copy = forward(&state, target);

        clone_barrier(&state, clone);
        assert_eq!(state.heap.load_ref_slot(clone, 0), ObjRef::NULL);
        assert_eq!(state.heap.load_ref_slot(clone, 1), copy);
    }
}
