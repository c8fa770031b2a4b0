//! SATB - Snapshot-At-The-Beginning Queues
//!
//! While marking is active, the store pre-barrier records the previous value
//! of every overwritten reference field. Everything reachable when marking
//! started is therefore either traced from the roots or logged here, so an
//! object cannot escape the snapshot by being unlinked mid-mark.
//!
//! ```text
//!  mutator thread buffers            completed buffers         mark workers
//!  ┌────────────┐ full             ┌──────────────────┐ claim ┌──────────┐
//!  │ [a, b, c ] │ ───────────────▶ │ [..] [..] [..]   │ ────▶ │ worker 0 │
//!  └────────────┘                  └──────────────────┘       └──────────┘
//!  final mark flushes partial buffers into the completed list
//! ```

use crate::object::ObjRef;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Global set of completed SATB buffers
pub struct SatbQueueSet {
    active: AtomicBool,
    buffer_size: usize,
    completed: Mutex<Vec<Vec<ObjRef>>>,
    enqueued: AtomicUsize,
}

impl SatbQueueSet {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            active: AtomicBool::new(false),
            buffer_size: buffer_size.max(1),
            completed: Mutex::new(Vec::new()),
            enqueued: AtomicUsize::new(0),
        }
    }

    /// Is the pre-barrier recording?
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Append `obj` to a thread buffer, publishing the buffer once full
    pub fn enqueue(&self, buffer: &mut Vec<ObjRef>, obj: ObjRef) {
        if buffer.capacity() == 0 {
            buffer.reserve_exact(self.buffer_size);
        }
        buffer.push(obj);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if buffer.len() >= self.buffer_size {
            let full = std::mem::replace(buffer, Vec::with_capacity(self.buffer_size));
            self.completed.lock().push(full);
        }
    }

    /// Publish a partial thread buffer
    pub fn flush(&self, buffer: &mut Vec<ObjRef>) {
        if !buffer.is_empty() {
            let partial = std::mem::take(buffer);
            self.completed.lock().push(partial);
        }
    }

    /// Take one completed buffer for processing
    pub fn claim_completed(&self) -> Option<Vec<ObjRef>> {
        self.completed.lock().pop()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    /// Total entries ever logged
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Drop all completed buffers (marking abandoned)
    pub fn abandon(&self) {
        self.completed.lock().clear();
    }
}
