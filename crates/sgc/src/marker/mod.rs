//! Marker Module - Concurrent SATB Marking
//!
//! This module finds the live objects of the heap while mutators run.
//!
//! Marking Algorithm:
//! - Snapshot-at-the-beginning: everything reachable at init mark is live,
//!   objects allocated during marking (at or above TAMS) are implicitly live
//! - Mark bits are set with an atomic fetch-or; only the first marker traces
//! - The store pre-barrier logs overwritten references into SATB buffers
//!
//! Marking Phases:
//! 1. Pause Init Mark - capture TAMS, scan strong roots
//! 2. Concurrent Mark - parallel workers drain queues and SATB buffers
//! 3. Pause Final Mark - flush thread buffers, drain to a fixed point
//!
//! Class unloading: with unloading on for the cycle, scanning an object
//! claims the loader of its class for the current epoch and pushes the
//! loader's holder and mirrors. Loaders left unclaimed are unloaded.

pub mod bitmap;
pub mod gc_threads;
pub mod mark_queue;
pub mod roots;
pub mod satb;

pub use bitmap::MarkBitmap;
pub use gc_threads::WorkGang;
pub use mark_queue::{MarkQueueSet, MarkTask, Terminator};
pub use roots::{RootCounts, RootScanner, RootScope, RootType};
pub use satb::SatbQueueSet;

use crate::gc::HeapState;
use crate::heap::Heap;
use crate::object::{ClassId, LoaderId, ObjKind, ObjRef};
use indexmap::IndexSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Objects scanned between SATB drains, pacer reports and cancel checks
const DRAIN_INTERVAL: usize = 256;

/// Per-worker scratch state for one marking task
struct WorkerContext {
    /// Live words per region, merged into the regions when the task ends
    live: Vec<usize>,
    claimed_classes: IndexSet<u32>,
    claimed_loaders: IndexSet<u32>,
    scanned: usize,
    unreported_words: usize,
}

impl WorkerContext {
    fn new(region_count: usize) -> Self {
        Self {
            live: vec![0; region_count],
            claimed_classes: IndexSet::new(),
            claimed_loaders: IndexSet::new(),
            scanned: 0,
            unreported_words: 0,
        }
    }
}

/// ConcurrentMark - marking context shared by all cycle kinds
pub struct ConcurrentMark {
    queues: MarkQueueSet,
    /// Claim epoch for class loaders; bumped at every mark start
    epoch: AtomicU64,
    unload_classes: AtomicBool,
    marked_objects: AtomicUsize,
}

impl ConcurrentMark {
    pub fn new(max_workers: usize) -> Self {
        Self {
            queues: MarkQueueSet::new(max_workers),
            epoch: AtomicU64::new(0),
            unload_classes: AtomicBool::new(false),
            marked_objects: AtomicUsize::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Does the current marking unload classes?
    pub fn unload_classes(&self) -> bool {
        self.unload_classes.load(Ordering::Acquire)
    }

    /// Objects traced since the last mark start
    pub fn marked_objects(&self) -> usize {
        self.marked_objects.load(Ordering::Relaxed)
    }

    pub fn has_pending_work(&self) -> bool {
        !self.queues.is_empty()
    }

    // === Phase entry points ===

    /// Clear mark bits and live data of the whole heap
    pub(crate) fn reset(&self, heap: &Heap) {
        heap.mark_bitmap().clear();
        for r in heap.regions() {
            r.clear_live_data();
        }
    }

    /// Begin a marking: new claim epoch, TAMS captured at current tops
    ///
    /// Runs inside a pause.
    pub(crate) fn start(&self, heap: &Heap, unload_classes: bool) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.unload_classes.store(unload_classes, Ordering::Release);
        self.marked_objects.store(0, Ordering::Relaxed);
        for r in heap.regions() {
            r.capture_top_at_mark_start();
        }
        epoch
    }

    /// Mark every strong root and queue it for tracing
    pub(crate) fn mark_roots(&self, state: &HeapState) -> RootCounts {
        let scope = RootScope::Marking {
            unload_classes: self.unload_classes(),
        };
        let scanner = RootScanner::new(&state.threads, &state.globals, &state.classes, &state.strings);
        scanner.oops_do(scope, |slot| {
            let obj = *slot;
            if state.heap.mark_object(obj) {
                self.queues.push(obj);
            }
        })
    }

    /// Run marking workers until the queues drain or the GC is cancelled
    ///
    /// # Returns
    /// True if marking reached termination; false if it stopped on
    /// cancellation with work left in the injector.
    pub(crate) fn mark_loop(&self, state: &HeapState, gang: &WorkGang, cancellable: bool) -> bool {
        let active = gang.max_workers().min(self.queues.nworkers());
        let terminator = Terminator::new(active);
        gang.run_task(active, |id| self.mark_worker(state, id, &terminator, cancellable));
        !(cancellable && state.is_cancelled())
    }

    /// Complete marking inside the final-mark pause
    ///
    /// Publishes every thread's partial SATB buffer, then drains buffers and
    /// queues to a fixed point without honouring cancellation.
    pub(crate) fn finish(&self, state: &HeapState, gang: &WorkGang) {
        state.threads.flush_all_satb(&state.satb);
        self.mark_loop(state, gang, false);
        debug_assert!(self.queues.is_empty());
        debug_assert_eq!(state.satb.completed_count(), 0);
    }

    /// Objects allocated during marking count as live
    pub(crate) fn account_above_tams(&self, heap: &Heap) {
        for r in heap.regions() {
            if r.is_active() && r.top() > r.tams() {
                r.add_live_words(r.top() - r.tams());
            }
        }
    }

    /// Drop all marking work; the bitmap is left as is
    pub(crate) fn abandon(&self, state: &HeapState) {
        state.satb.set_active(false);
        state.threads.abandon_all_satb();
        state.satb.abandon();
        self.queues.clear();
    }

    // === Worker ===

    fn mark_worker(&self, state: &HeapState, id: usize, terminator: &Terminator, cancellable: bool) {
        let Some(worker) = self.queues.take_worker(id) else {
            log::warn!(target: "sgc", "Mark worker {} has no queue", id);
            return;
        };
        let task = MarkTask::new(id, worker, &self.queues);
        let mut ctx = WorkerContext::new(state.heap.region_count());

        'work: loop {
            if cancellable && state.is_cancelled() {
                break;
            }
            while let Some(obj) = task.pop() {
                self.scan_object(state, &task, obj, &mut ctx);
                if ctx.scanned % DRAIN_INTERVAL == 0 {
                    if let Some(buffer) = state.satb.claim_completed() {
                        self.drain_satb_buffer(state, &task, buffer);
                    }
                    state.pacer.report_progress(ctx.unreported_words);
                    ctx.unreported_words = 0;
                    if cancellable && state.is_cancelled() {
                        break 'work;
                    }
                }
            }
            if let Some(buffer) = state.satb.claim_completed() {
                self.drain_satb_buffer(state, &task, buffer);
                continue;
            }
            if terminator.try_terminate() {
                break;
            }
        }

        for (idx, words) in ctx.live.iter().enumerate() {
            if *words > 0 {
                state.heap.region(idx).add_live_words(*words);
            }
        }
        state.pacer.report_progress(ctx.unreported_words);
        self.marked_objects.fetch_add(ctx.scanned, Ordering::Relaxed);
        task.finish();
    }

    fn drain_satb_buffer(&self, state: &HeapState, task: &MarkTask<'_>, buffer: Vec<ObjRef>) {
        for obj in buffer {
            if !obj.is_null() && state.heap.mark_object(obj) {
                task.push(obj);
            }
        }
    }

    fn mark_and_push(&self, heap: &Heap, task: &MarkTask<'_>, obj: ObjRef) {
        if !obj.is_null() && heap.mark_object(obj) {
            task.push(obj);
        }
    }

    /// Trace one marked object
    fn scan_object(&self, state: &HeapState, task: &MarkTask<'_>, obj: ObjRef, ctx: &mut WorkerContext) {
        let heap = &state.heap;
        let Some(klass) = heap.klass(obj) else {
            log::error!(target: "sgc", "Marking reached unparseable object {:?}", obj);
            return;
        };
        let shape = heap.shape(obj);
        let size = shape.size_words();
        self.count_live(heap, obj, size, ctx);
        ctx.scanned += 1;
        ctx.unreported_words += size;

        if self.unload_classes() {
            let epoch = self.epoch();
            if klass.class.0 >= ClassId::BUILTIN_COUNT {
                self.claim_class(state, task, klass.class, epoch, ctx);
            }
            match klass.kind {
                ObjKind::Mirror if shape.prims > 0 => {
                    let mirrored = ClassId(heap.load_prim(obj, 0) as u32);
                    self.claim_class(state, task, mirrored, epoch, ctx);
                }
                ObjKind::Loader if shape.prims > 0 => {
                    let loader = LoaderId(heap.load_prim(obj, 0) as u32);
                    if ctx.claimed_loaders.insert(loader.0) {
                        if let Some(refs) = state.classes.claim_loader(loader, epoch) {
                            for r in refs {
                                self.mark_and_push(heap, task, r);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        for i in 0..shape.refs as usize {
            self.mark_and_push(heap, task, heap.load_ref_slot(obj, i));
        }
    }

    fn claim_class(
        &self,
        state: &HeapState,
        task: &MarkTask<'_>,
        class: ClassId,
        epoch: u64,
        ctx: &mut WorkerContext,
    ) {
        if !ctx.claimed_classes.insert(class.0) {
            return;
        }
        if let Some(refs) = state.classes.claim_class(class, epoch) {
            for r in refs {
                self.mark_and_push(&state.heap, task, r);
            }
        }
    }

    /// Live words go to the object's region; humongous objects spread
    /// over their whole run
    fn count_live(&self, heap: &Heap, obj: ObjRef, size: usize, ctx: &mut WorkerContext) {
        let start = heap.region_index_of_addr(obj.addr());
        if !heap.region(start).is_humongous_start() {
            ctx.live[start] += size;
            return;
        }
        let region_words = heap.region_words();
        let mut remaining = size;
        let mut idx = start;
        while remaining > 0 && idx < ctx.live.len() {
            let words = remaining.min(region_words);
            ctx.live[idx] += words;
            remaining -= words;
            idx += 1;
        }
    }
}
