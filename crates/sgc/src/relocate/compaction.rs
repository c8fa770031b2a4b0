//! Compaction - Stop-the-World Sliding Mark-Compact
//!
//! Full GC compacts the heap in place after a complete marking. Live
//! objects of movable regions slide towards the bottom of the heap, in
//! address order, so an object never moves above its old address.
//!
//! Phases (all inside the Full GC pause):
//! 1. Compute addresses: walk movable regions in index order, assign each
//!    marked object the next destination and store it as `Forwarded(dest)`
//! 2. Adjust pointers: every reference slot of every live object, and
//!    every root, is rewritten to its target's destination
//! 3. Move objects: ascending order; a copy never overwrites an object
//!    that has not moved yet
//! 4. Finish: reset region tops and states, reclaim dead humongous
//!    objects, clear marks, rebuild the free set
//!
//! Movable regions are Regular regions. Pinned and humongous regions keep
//! their objects where they are.

use crate::gc::HeapState;
use crate::heap::{Heap, Region};
use crate::marker::gc_threads::WorkGang;
use crate::marker::{RootScanner, RootScope};
use crate::object::{MarkWord, ObjRef};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of one compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub moved_objects: usize,
    pub moved_words: usize,
    pub live_words: usize,
    pub regions_freed: usize,
    pub humongous_reclaimed: usize,
}

fn is_movable(r: &Region) -> bool {
    r.is_regular()
}

/// Slide every live object down and rebuild the heap's region state
///
/// Requires a complete marking of the whole heap and no forwarded objects.
pub fn compact(state: &HeapState, gang: &WorkGang) -> CompactionStats {
    let heap = &state.heap;
    let mut stats = CompactionStats::default();

    let new_tops = compute_addresses(heap, &mut stats);
    adjust_pointers(state, gang);
    move_objects(heap, &mut stats);
    finish(state, &new_tops, &mut stats);

    log::debug!(
        target: "sgc",
        "Compacted: {} objects moved ({}K), {} regions freed, {} humongous regions reclaimed",
        stats.moved_objects,
        stats.moved_words * 8 / 1024,
        stats.regions_freed,
        stats.humongous_reclaimed
    );
    stats
}

/// Phase 1: assign destinations
///
/// # Returns
/// New top per region index; only meaningful for movable regions
fn compute_addresses(heap: &Heap, stats: &mut CompactionStats) -> Vec<usize> {
    let movable: Vec<usize> = heap
        .regions()
        .iter()
        .filter(|r| is_movable(r))
        .map(|r| r.index())
        .collect();
    let mut new_tops: Vec<usize> = heap.regions().iter().map(|r| r.bottom()).collect();

    let Some(&first) = movable.first() else {
        return new_tops;
    };
    let mut dest_slot = 0;
    let mut dest_region = heap.region(first);
    let mut cursor = dest_region.bottom();

    for &idx in &movable {
        let r = heap.region(idx);
        heap.walk_live_objects(r, r.top(), |obj, size| {
            while cursor + size > dest_region.end() {
                new_tops[dest_region.index()] = cursor;
                dest_slot += 1;
                dest_region = heap.region(movable[dest_slot]);
                cursor = dest_region.bottom();
            }
            debug_assert!(cursor <= obj.addr(), "sliding must not move objects up");
            if cursor != obj.addr() {
                heap.set_mark(obj, MarkWord::Forwarded(ObjRef::from_addr(cursor)));
            }
            cursor += size;
            stats.live_words += size;
        });
    }
    new_tops[dest_region.index()] = cursor;
    new_tops
}

/// Phase 2: rewrite every slot to its target's destination
fn adjust_pointers(state: &HeapState, gang: &WorkGang) {
    let heap = &state.heap;
    let next = AtomicUsize::new(0);

    gang.run_task(gang.max_workers(), |_| loop {
        let idx = next.fetch_add(1, Ordering::Relaxed);
        if idx >= heap.region_count() {
            break;
        }
        let r = heap.region(idx);
        if !r.is_active() {
            continue;
        }
        heap.walk_live_objects(r, r.top(), |obj, _| {
            for i in 0..heap.shape(obj).refs as usize {
                let v = heap.load_ref_slot(obj, i);
                let fwd = heap.resolve(v);
                if fwd != v {
                    heap.store_ref_slot(obj, i, fwd);
                }
            }
        });
    });

    let scanner = RootScanner::new(&state.threads, &state.globals, &state.classes, &state.strings);
    scanner.oops_do(RootScope::All, |slot| *slot = heap.resolve(*slot));
}

/// Phase 3: copy objects to their destinations, lowest address first
fn move_objects(heap: &Heap, stats: &mut CompactionStats) {
    for r in heap.regions().iter().filter(|r| is_movable(r)) {
        heap.walk_live_objects(r, r.top(), |obj, size| {
            if let Some(dest) = heap.mark(obj).forwardee() {
                heap.copy_object_body(obj.addr(), dest.addr(), size);
                heap.set_mark(dest, MarkWord::Normal);
                stats.moved_objects += 1;
                stats.moved_words += size;
            }
        });
    }
}

/// Phase 4: new tops, states and live data
fn finish(state: &HeapState, new_tops: &[usize], stats: &mut CompactionStats) {
    let heap = &state.heap;
    let now = heap.now_ms();

    for r in heap.regions() {
        if is_movable(r) {
            let top = new_tops[r.index()];
            if top == r.bottom() {
                match r.make_empty_after_compaction(now) {
                    Ok(()) => stats.regions_freed += 1,
                    Err(e) => log::error!(target: "sgc", "Compaction: {}", e),
                }
            } else {
                r.set_top(top);
                r.set_live_words(r.used_words());
            }
        } else if r.is_humongous_start() && !r.is_pinned() {
            let obj = ObjRef::from_addr(r.bottom());
            if !heap.is_marked(obj) {
                let span = heap.humongous_span(r.index());
                for i in r.index()..r.index() + span {
                    if heap.region(i).make_trash().is_ok() {
                        stats.humongous_reclaimed += 1;
                    }
                }
            }
        }
    }

    heap.mark_bitmap().clear();
    for r in heap.regions() {
        r.set_tams(r.bottom());
        r.set_update_watermark(r.bottom());
    }

    let recycled = heap.lock().recycle_trash(heap);
    if recycled > 0 {
        log::debug!(target: "sgc", "Compaction recycled {} trash regions", recycled);
    }
    heap.recompute_used();
    state.rebuild_free_set();
}
