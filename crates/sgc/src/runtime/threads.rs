//! Thread Registry - Per-Mutator Collector State
//!
//! Each attached mutator owns a [`ThreadState`]: its handle stack (a root
//! set), its SATB buffer, and its TLAB/GCLAB. The owning thread locks these
//! for the duration of one operation; pauses lock them while every mutator
//! is parked, so the locks are never contended across a safepoint.

use crate::allocator::{AllocType, Lab};
use crate::heap::Heap;
use crate::marker::satb::SatbQueueSet;
use crate::object::ObjRef;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Collector-visible state of one mutator thread
pub struct ThreadState {
    id: usize,
    name: String,
    pub(crate) handles: Mutex<Vec<ObjRef>>,
    pub(crate) satb: Mutex<Vec<ObjRef>>,
    pub(crate) tlab: Mutex<Lab>,
    pub(crate) gclab: Mutex<Lab>,
    allocated_bytes: AtomicUsize,
}

impl ThreadState {
    fn new(id: usize, name: String) -> Self {
        Self {
            id,
            name,
            handles: Mutex::new(Vec::new()),
            satb: Mutex::new(Vec::new()),
            tlab: Mutex::new(Lab::new(AllocType::Tlab)),
            gclab: Mutex::new(Lab::new(AllocType::Gclab)),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn add_allocated(&self, bytes: usize) {
        self.allocated_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn handle_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Retire both LABs; called at every pause and on detach
    pub fn retire_labs(&self, heap: &Heap) {
        self.tlab.lock().retire(heap);
        self.gclab.lock().retire(heap);
    }

    /// Publish the partial SATB buffer
    pub fn flush_satb(&self, satb: &SatbQueueSet) {
        satb.flush(&mut self.satb.lock());
    }
}

/// All attached mutator threads
pub struct ThreadRegistry {
    threads: Mutex<IndexMap<usize, Arc<ThreadState>>>,
    next_id: AtomicUsize,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(IndexMap::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn register(&self, name: &str) -> Arc<ThreadState> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(ThreadState::new(id, name.to_string()));
        self.threads.lock().insert(id, Arc::clone(&state));
        state
    }

    pub fn unregister(&self, id: usize) {
        self.threads.lock().shift_remove(&id);
    }

    pub fn count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Snapshot of the attached threads, in attach order
    pub fn snapshot(&self) -> Vec<Arc<ThreadState>> {
        self.threads.lock().values().cloned().collect()
    }

    pub fn retire_all_labs(&self, heap: &Heap) {
        for t in self.snapshot() {
            t.retire_labs(heap);
        }
    }

    pub fn flush_all_satb(&self, satb: &SatbQueueSet) {
        for t in self.snapshot() {
            t.flush_satb(satb);
        }
    }

    /// Discard every thread's partial SATB buffer
    pub fn abandon_all_satb(&self) {
        for t in self.snapshot() {
            t.satb.lock().clear();
        }
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister_order() {
        let registry = ThreadRegistry::new();
        let a = registry.register("main");
        let b = registry.register("worker");
        assert_ne!(a.id(), b.id());
        let names: Vec<_> = registry.snapshot().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["main", "worker"]);

        registry.unregister(a.id());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_flush_satb_publishes() {
        let registry = ThreadRegistry::new();
        let satb = SatbQueueSet::new(16);
        let t = registry.register("main");
        satb.enqueue(&mut t.satb.lock(), ObjRef::from_addr(3));
        registry.flush_all_satb(&satb);
        assert_eq!(satb.completed_count(), 1);
    }
}
