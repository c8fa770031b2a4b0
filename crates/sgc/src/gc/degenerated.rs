//! Degenerated GC - Finishing a Cancelled Cycle in One Pause
//!
//! When a concurrent cycle is cancelled by an allocation failure, the
//! degenerated GC continues it with mutators stopped, starting from the
//! point where the concurrent cycle stopped:
//!
//! ```text
//!   OutsideCycle ─▶ Mark ─▶ Evac ─▶ UpdateRefs ─▶ cleanup
//!   (init mark)   (finish)  (evac)  (update refs)
//! ```
//!
//! Each entry point falls through to the following steps. If evacuation
//! runs out of memory, or the cycle reclaimed too little, it upgrades to
//! a Full GC inside the same pause.

use super::concurrent::{
    final_mark_work, final_update_refs_work, init_mark_work, init_update_refs_work,
    notify_unloaded,
};
use super::full::{self, full_gc_work};
use super::{CycleScope, DegenPoint, GcCause, GcPhase, HeapState};
use crate::logging::GcEvent;
use crate::relocate;
use crate::runtime::classes::UnloadedLoader;
use crate::stats::CycleKind;
use crate::verifier::VerifyPoint;

/// Outcome of the degenerated pause
enum DegenResult {
    Done(Vec<UnloadedLoader>),
    Upgrade {
        reason: &'static str,
        unloaded: Vec<UnloadedLoader>,
    },
}

/// Run a degenerated cycle from `point`
pub(crate) fn run(state: &HeapState, point: DegenPoint, cause: GcCause) {
    let point = match point {
        DegenPoint::Unset => DegenPoint::OutsideCycle,
        p => p,
    };
    let scope = CycleScope::begin(state, CycleKind::Degenerated, cause);
    log::warn!(
        target: "sgc",
        "GC({}) Degenerated GC from {}",
        scope.cycle(),
        point.name()
    );
    state.logger.log(GcEvent::Degenerated {
        cycle: scope.cycle(),
        point: point.name().to_string(),
    });

    let result = state.pause(GcPhase::Degenerated, || {
        let mut unloaded = Vec::new();
        let finished = degenerate(state, point, &mut unloaded);
        let reason = if !finished {
            Some("evacuation ran out of memory")
        } else if !scope.metrics().is_good_progress(state) {
            Some("no progress")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                // Upgrade in the same pause
                log::warn!(
                    target: "sgc",
                    "GC({}) Upgrading degenerated GC to Full GC: {}",
                    scope.cycle(),
                    reason
                );
                unloaded.extend(full_gc_work(state));
                DegenResult::Upgrade { reason, unloaded }
            }
            None => DegenResult::Done(unloaded),
        }
    });

    match result {
        DegenResult::Done(unloaded) => {
            notify_unloaded(state, &unloaded);
            state.heuristics().record_success_degenerated();
            state.policy.record_success_degenerated();
            state.set_progress_last_gc(true);
            state.heap.reset_bytes_allocated_since_gc_start();
            scope.end(state, CycleKind::Degenerated);
        }
        DegenResult::Upgrade { reason, unloaded } => {
            notify_unloaded(state, &unloaded);
            state.policy.record_degenerated_upgrade_to_full();
            state.logger.log(GcEvent::UpgradeToFull {
                cycle: scope.cycle(),
                reason: reason.to_string(),
            });
            full::complete(state, scope);
        }
    }
}

/// The degenerated cycle body; runs inside the pause
///
/// # Returns
/// False if evacuation failed and a Full GC is required
fn degenerate(state: &HeapState, point: DegenPoint, unloaded: &mut Vec<UnloadedLoader>) -> bool {
    let heap = &state.heap;
    state.clear_cancelled();

    if point == DegenPoint::OutsideCycle {
        state.recycle_trash();
        state.marker.reset(heap);
        let unload = state.heuristics().should_unload_classes();
        init_mark_work(state, unload);
    }

    if matches!(point, DegenPoint::OutsideCycle | DegenPoint::Mark) {
        // Finish drains whatever concurrent marking left behind
        unloaded.extend(final_mark_work(state));
        state.recycle_trash();
        if heap.collection_set().is_empty() {
            state.verify(VerifyPoint::AfterDegenerated);
            return true;
        }
    }

    if point != DegenPoint::UpdateRefs {
        state.evac_oom.clear();
        if !relocate::evacuate_collection_set(state, &state.parallel_workers, false)
            || state.evac_oom.is_oom()
        {
            return false;
        }
        init_update_refs_work(state);
    }

    relocate::update_heap_references(state, &state.parallel_workers, false);
    final_update_refs_work(state);
    state.recycle_trash();
    state.verify(VerifyPoint::AfterDegenerated);
    true
}
