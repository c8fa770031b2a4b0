//! Relocate Module - Evacuation, Reference Updating and Compaction
//!
//! Concurrent relocation moves the live objects of the collection set out
//! of their regions while mutators run:
//!
//! ```text
//!  Final Mark (pause)      cset chosen, roots evacuated, EVACUATION set
//!  Concurrent Evacuation   workers copy every live cset object
//!  Init Update Refs        update watermark = top
//!  Concurrent Update Refs  heap slots pointing into the cset are healed
//!  Final Update Refs       roots healed, cset regions trashed
//! ```
//!
//! Between the forwarding CAS and the end of update refs, the old copy
//! stays readable: barriers resolve every access through the mark word.
//!
//! Full GC does not use any of this; it slides objects inside a pause
//! ([`compaction`]).

pub mod compaction;
pub mod copy;
pub mod evac_oom;
pub mod update_refs;

pub use compaction::{compact, CompactionStats};
pub use copy::evacuate_object;
pub use evac_oom::EvacOomHandler;
pub use update_refs::{update_heap_references, update_roots};

use crate::allocator::{AllocType, Lab};
use crate::gc::HeapState;
use crate::marker::gc_threads::WorkGang;
use crate::marker::{RootScanner, RootScope};

/// Evacuate every live object of the collection set
///
/// Workers claim cset regions in selection order, each with its own GCLAB.
/// A cancellable run stops claiming once the GC is cancelled; a
/// non-cancellable run (degenerated GC) still stops copying if it runs out
/// of space, since every copy then just resolves.
///
/// # Returns
/// True if the GC was not cancelled during evacuation
pub fn evacuate_collection_set(state: &HeapState, gang: &WorkGang, cancellable: bool) -> bool {
    let heap = &state.heap;
    let cset = heap.collection_set();
    cset.clear_current_index();

    gang.run_task(gang.max_workers(), |_| {
        let mut lab = Lab::new(AllocType::Gclab);
        while let Some(idx) = cset.claim_next() {
            if cancellable && state.is_cancelled() {
                break;
            }
            let r = heap.region(idx);
            let mut words = 0;
            heap.walk_live_objects(r, r.top(), |obj, size| {
                evacuate_object(state, &mut lab, obj);
                words += size;
            });
            log::trace!(target: "sgc", "Evacuated region {}: {} live words", idx, words);
            state.pacer.report_progress(words);
        }
        lab.retire(heap);
    });

    !state.is_cancelled()
}

/// Evacuate the cset objects referenced from roots; inside a pause
///
/// Every root slot ends up pointing at a to-space copy, so mutators
/// leave the pause with no from-space reference in hand.
pub fn evacuate_roots(state: &HeapState) {
    let heap = &state.heap;
    let mut lab = Lab::new(AllocType::Gclab);
    let scanner = RootScanner::new(&state.threads, &state.globals, &state.classes, &state.strings);
    let counts = scanner.oops_do(RootScope::All, |slot| {
        if heap.in_cset(*slot) {
            *slot = evacuate_object(state, &mut lab, *slot);
        }
    });
    lab.retire(heap);
    log::debug!(target: "sgc", "Evacuated roots: {} slots scanned", counts.total());
}
