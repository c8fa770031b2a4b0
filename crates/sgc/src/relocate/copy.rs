//! Object Copying - Evacuation of a Single Object
//!
//! Any thread may evacuate a cset object: GC workers during concurrent
//! evacuation, mutators from the write barrier, the pause that evacuates
//! roots. Racing copiers agree on one copy through the forwarding CAS on
//! the original's mark word:
//!
//! ```text
//!  1. forwarded already?          -> return forwardee
//!  2. enter OOM scope             (refused -> return resolve(obj))
//!  3. allocate copy in GCLAB      (or a shared GC request)
//!  4. copy body, fresh mark word
//!  5. CAS mark: Normal -> Forwarded(copy)
//!        won  -> copy is canonical
//!        lost -> undo LAB bump or fill the copy, use the winner's copy
//!  6. leave OOM scope
//! ```
//!
//! No thread ever sees a partially installed copy: the copy is complete
//! before the CAS publishes it.

use crate::allocator::{AllocRequest, Lab};
use crate::gc::{GcCause, HeapState};
use crate::object::{MarkWord, ObjRef};

/// Evacuate `obj` and return its canonical copy
///
/// `lab` is the calling thread's GCLAB. If no copy can be allocated the
/// GC is cancelled and the caller gets `resolve(obj)`: the winner's copy if
/// another thread got one in, otherwise the object itself.
pub fn evacuate_object(state: &HeapState, lab: &mut Lab, obj: ObjRef) -> ObjRef {
    let heap = &state.heap;
    if let Some(fwd) = heap.mark(obj).forwardee() {
        return fwd;
    }
    if !state.evac_oom.enter() {
        return heap.resolve(obj);
    }

    let size = heap.object_size(obj);
    let (addr, from_lab) = match lab.allocate_or_refill(heap, size) {
        Some(addr) => (addr, true),
        None => {
            let mut req = AllocRequest::for_shared_gc(size);
            match heap.allocate(&mut req) {
                Some(addr) => (addr, false),
                None => {
                    log::debug!(
                        target: "sgc",
                        "Evacuation of {:?} ({} words) failed: no space",
                        obj,
                        size
                    );
                    state.cancel_gc(GcCause::AllocationFailureEvac);
                    state.evac_oom.handle_oom();
                    return heap.resolve(obj);
                }
            }
        }
    };

    heap.copy_object_body(obj.addr(), addr, size);
    let copy = ObjRef::from_addr(addr);
    heap.set_mark(copy, MarkWord::Normal);

    let result = match heap.cas_mark(obj, MarkWord::Normal, MarkWord::Forwarded(copy)) {
        Ok(()) => {
            state.stats.record_evacuated(size * 8);
            copy
        }
        Err(winner) => {
            if !(from_lab && lab.undo_allocation(addr, size)) {
                heap.fill_with_filler(addr, size);
            }
            winner.forwardee().unwrap_or(obj)
        }
    };
    state.evac_oom.leave();
    result
}
