//! Heap Verifier
//!
//! With `ShenandoahVerify` on, every pause checks the heap at fixed
//! points. The verifier walks the object graph breadth-first from all
//! roots, weak ones included, and checks every reachable object:
//!
//! - the reference lies inside the heap, in an active region
//! - the header decodes and the object fits in the heap
//! - forwarded objects only appear where forwarding is expected, and a
//!   forwardee is never in the collection set
//! - after marking, every reachable object is marked
//!
//! A failure is fatal: it is logged and the process aborts.

use crate::error::{Result, SgcError};
use crate::gc::HeapState;
use crate::logging::GcEvent;
use crate::marker::{RootScanner, RootScope};
use crate::object::{MarkWord, ObjRef};
use indexmap::IndexSet;
use std::collections::VecDeque;
use std::fmt;

/// Where in a cycle the heap is verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyPoint {
    BeforeMark,
    AfterMark,
    AfterEvacRoots,
    AfterUpdateRefs,
    AfterDegenerated,
    BeforeFullGc,
    AfterFullGc,
}

impl VerifyPoint {
    pub fn name(self) -> &'static str {
        match self {
            VerifyPoint::BeforeMark => "Before Mark",
            VerifyPoint::AfterMark => "After Mark",
            VerifyPoint::AfterEvacRoots => "After Evacuating Roots",
            VerifyPoint::AfterUpdateRefs => "After Updating References",
            VerifyPoint::AfterDegenerated => "After Degenerated GC",
            VerifyPoint::BeforeFullGc => "Before Full GC",
            VerifyPoint::AfterFullGc => "After Full GC",
        }
    }

    fn allows_forwarded(self) -> bool {
        matches!(self, VerifyPoint::AfterEvacRoots | VerifyPoint::BeforeFullGc)
    }

    fn requires_marked(self) -> bool {
        self == VerifyPoint::AfterMark
    }
}

impl fmt::Display for VerifyPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one verification pass looked at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub roots: usize,
    pub objects: usize,
    pub references: usize,
}

/// Walk everything reachable and check it
///
/// Runs inside a pause.
///
/// # Errors
/// `VerificationFailed` naming the first broken object
pub fn verify(state: &HeapState, point: VerifyPoint) -> Result<VerifyReport> {
    let heap = &state.heap;
    let fail = |message: String| SgcError::VerificationFailed {
        point: point.name().to_string(),
        message,
    };

    let mut report = VerifyReport::default();
    let mut visited: IndexSet<ObjRef> = IndexSet::new();
    let mut queue: VecDeque<ObjRef> = VecDeque::new();

    let scanner = RootScanner::new(&state.threads, &state.globals, &state.classes, &state.strings);
    let counts = scanner.oops_do(RootScope::All, |slot| {
        if visited.insert(*slot) {
            queue.push_back(*slot);
        }
    });
    report.roots = counts.total();

    while let Some(obj) = queue.pop_front() {
        check_object(state, point, obj).map_err(&fail)?;
        report.objects += 1;

        // A forwarded object's fields are stale; follow the copy instead
        let current = match heap.mark(obj) {
            MarkWord::Forwarded(fwd) => {
                if visited.insert(fwd) {
                    queue.push_back(fwd);
                }
                continue;
            }
            _ => obj,
        };

        for i in 0..heap.shape(current).refs as usize {
            let child = heap.load_ref_slot(current, i);
            if child.is_null() {
                continue;
            }
            report.references += 1;
            if visited.insert(child) {
                queue.push_back(child);
            }
        }
    }

    log::debug!(
        target: "sgc",
        "Verify {}: {} roots, {} objects, {} references",
        point,
        report.roots,
        report.objects,
        report.references
    );
    Ok(report)
}

fn check_object(state: &HeapState, point: VerifyPoint, obj: ObjRef) -> std::result::Result<(), String> {
    let heap = &state.heap;
    if !heap.is_in(obj) {
        return Err(format!("reference {:#x} outside the heap", obj.addr()));
    }
    let region = heap.region_of(obj);
    if !region.is_active() {
        return Err(format!(
            "object {:#x} in region {} with state {:?}",
            obj.addr(),
            region.index(),
            region.state()
        ));
    }
    if obj.addr() >= region.top() && !region.is_humongous_continuation() {
        return Err(format!(
            "object {:#x} above top {:#x} of region {}",
            obj.addr(),
            region.top(),
            region.index()
        ));
    }
    if heap.klass(obj).is_none() {
        return Err(format!("object {:#x} has a broken class word", obj.addr()));
    }
    if obj.addr() + heap.object_size(obj) > heap.heap_words() {
        return Err(format!(
            "object {:#x} of {} words runs past the heap",
            obj.addr(),
            heap.object_size(obj)
        ));
    }

    match heap.mark(obj) {
        MarkWord::Filler(_) => {
            return Err(format!("reference {:#x} to a filler", obj.addr()));
        }
        MarkWord::Forwarded(fwd) => {
            if !point.allows_forwarded() {
                return Err(format!(
                    "object {:#x} forwarded to {:#x}",
                    obj.addr(),
                    fwd.addr()
                ));
            }
            if heap.in_cset(fwd) {
                return Err(format!(
                    "object {:#x} forwarded into the collection set at {:#x}",
                    obj.addr(),
                    fwd.addr()
                ));
            }
        }
        MarkWord::Normal => {}
    }

    if point.requires_marked() && !heap.is_marked(obj) {
        return Err(format!("reachable object {:#x} is not marked", obj.addr()));
    }
    Ok(())
}

/// Verify and abort the process on failure
pub fn verify_or_abort(state: &HeapState, point: VerifyPoint) {
    if let Err(e) = verify(state, point) {
        log::error!(target: "sgc", "{}", e);
        if let SgcError::VerificationFailed { point, message } = &e {
            state.logger.log(GcEvent::VerificationFailure {
                point: point.clone(),
                message: message.clone(),
            });
        }
        eprintln!("{}", e);
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocRequest;
    use crate::config::{GcConfig, KB};
    use crate::object::{ClassId, Klass, ObjKind, Shape};

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

    #[test]
    fn test_valid_graph_passes() {
        let state = state();
        let a = alloc(&state, 2);
        let b = alloc(&state, 0);
        state.heap.store_ref_slot(a, 0, b);
        state.heap.store_ref_slot(a, 1, a);
        state.globals.create(a);

        let report = verify(&state, VerifyPoint::BeforeMark).unwrap();

        assert_eq!(report.roots, 1);
        assert_eq!(report.objects, 2);
        assert_eq!(report.references, 2);
    }

    #[test]
    fn test_unmarked_object_after_mark_fails() {
        let state = state();
        let a = alloc(&state, 0);
        state.globals.create(a);
        for r in state.heap.regions() {
            r.capture_top_at_mark_start();
        }

        let err = verify(&state, VerifyPoint::AfterMark).unwrap_err();
        assert!(err.to_string().contains("not marked"));

        state.heap.mark_object(a);
        assert!(verify(&state, VerifyPoint::AfterMark).is_ok());
    }

    #[test]
    fn test_forwarding_only_allowed_after_evac_roots() {
        let state = state();
        let a = alloc(&state, 0);
        let copy = alloc(&state, 0);
        state.heap.set_mark(a, MarkWord::Forwarded(copy));
        state.globals.create(a);

        assert!(verify(&state, VerifyPoint::AfterEvacRoots).is_ok());
        let err = verify(&state, VerifyPoint::AfterUpdateRefs).unwrap_err();
        assert!(matches!(err, SgcError::VerificationFailed { .. }));
    }

    #[test]
    fn test_reference_into_empty_region_fails() {
        let state = state();
        let stray = ObjRef::from_addr(state.heap.region(5).bottom());
        state.globals.create(stray);

        assert!(verify(&state, VerifyPoint::AfterFullGc).is_err());
    }
}
