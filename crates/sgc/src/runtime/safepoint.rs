//! Safepoint Management
//!
//! A safepoint is a point where mutator threads can be stopped for a pause.
//! Only the control thread begins pauses.
//!
//! ## Protocol
//!
//! ```text
//!  control thread                      mutator thread
//!  ──────────────                      ──────────────
//!  begin(): requested = true
//!           wait until safe == attached   poll(): requested? → block()
//!                                          block(): safe += 1, wait
//!  ... pause work ...
//!  end():   requested = false, notify     wake, safe -= 1
//! ```
//!
//! A mutator about to block outside the collector (join, sleep, waiting for
//! a GC) enters a safe region: it counts as safe until it leaves, and
//! leaving waits for any pause in progress to end.
//!
//! Polling is one relaxed load when no pause is pending.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct SafepointInner {
    /// Mutator threads attached to the runtime
    attached: usize,
    /// Attached threads parked at a poll or inside a safe region
    safe: usize,
    /// A pause is running
    active: bool,
}

/// Safepoint - coordination point between the control thread and mutators
///
/// # Examples
///
/// ```rust
/// use sgc::runtime::safepoint::Safepoint;
///
/// let safepoint = Safepoint::new();
/// safepoint.attach();
/// safepoint.enter_safe_region();
///
/// // The only attached thread is safe, so the pause can begin
/// safepoint.begin();
/// assert!(safepoint.is_requested());
/// safepoint.end();
///
/// safepoint.leave_safe_region();
/// safepoint.detach();
/// ```
pub struct Safepoint {
    requested: AtomicBool,
    inner: Mutex<SafepointInner>,
    cond: Condvar,
    count: AtomicU64,
}

impl Safepoint {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            inner: Mutex::new(SafepointInner::default()),
            cond: Condvar::new(),
            count: AtomicU64::new(0),
        }
    }

    /// Register a mutator thread; waits out a running pause
    pub fn attach(&self) {
        let mut inner = self.inner.lock();
        while inner.active {
            self.cond.wait(&mut inner);
        }
        inner.attached += 1;
    }

    /// Unregister a mutator thread
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.attached = inner.attached.saturating_sub(1);
        self.cond.notify_all();
    }

    /// Is a pause requested or running?
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Block here if a pause is pending
    #[inline]
    pub fn poll(&self) {
        if self.is_requested() {
            self.block();
        }
    }

    /// Park the calling mutator until the current pause ends
    pub fn block(&self) {
        let mut inner = self.inner.lock();
        if !inner.active {
            return;
        }
        inner.safe += 1;
        self.cond.notify_all();
        while inner.active {
            self.cond.wait(&mut inner);
        }
        inner.safe -= 1;
    }

    /// The calling mutator will not touch the heap until it leaves
    pub fn enter_safe_region(&self) {
        let mut inner = self.inner.lock();
        inner.safe += 1;
        self.cond.notify_all();
    }

    /// Resume heap access, waiting for a running pause to end
    pub fn leave_safe_region(&self) {
        let mut inner = self.inner.lock();
        while inner.active {
            self.cond.wait(&mut inner);
        }
        inner.safe = inner.safe.saturating_sub(1);
    }

    /// Stop the world: returns once every attached mutator is safe
    pub fn begin(&self) {
        let mut inner = self.inner.lock();
        inner.active = true;
        self.requested.store(true, Ordering::Release);
        while inner.safe < inner.attached {
            self.cond.wait(&mut inner);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Release all parked mutators
    pub fn end(&self) {
        let mut inner = self.inner.lock();
        inner.active = false;
        self.requested.store(false, Ordering::Release);
        self.cond.notify_all();
    }

    /// Is a pause running right now?
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn attached(&self) -> usize {
        self.inner.lock().attached
    }

    /// Number of pauses begun so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Safepoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_begin_waits_for_polling_mutator() {
        let safepoint = Arc::new(Safepoint::new());
        let stop = Arc::new(AtomicBool::new(false));
        let polls = Arc::new(AtomicUsize::new(0));

        safepoint.attach();
        let mutator = {
            let safepoint = Arc::clone(&safepoint);
            let stop = Arc::clone(&stop);
            let polls = Arc::clone(&polls);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    safepoint.poll();
                    polls.fetch_add(1, Ordering::Relaxed);
                }
                safepoint.detach();
            })
        };

        safepoint.begin();
        let frozen = polls.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(polls.load(Ordering::Relaxed), frozen, "mutator is parked");
        safepoint.end();

        stop.store(true, Ordering::Relaxed);
        mutator.join().unwrap();
        assert_eq!(safepoint.attached(), 0);
        assert_eq!(safepoint.count(), 1);
    }

    #[test]
    fn test_no_mutators_begins_immediately() {
        let safepoint = Safepoint::new();
        safepoint.begin();
        assert!(safepoint.is_active());
        safepoint.end();
        assert!(!safepoint.is_requested());
    }

    #[test]
    fn test_leave_safe_region_waits_for_pause() {
        let safepoint = Arc::new(Safepoint::new());
        safepoint.attach();
        safepoint.enter_safe_region();
        safepoint.begin();

        let left = Arc::new(AtomicBool::new(false));
        let handle = {
            let safepoint = Arc::clone(&safepoint);
            let left = Arc::clone(&left);
            thread::spawn(move || {
                safepoint.leave_safe_region();
                left.store(true, Ordering::Release);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!left.load(Ordering::Acquire));
        safepoint.end();
        handle.join().unwrap();
        assert!(left.load(Ordering::Acquire));
    }
}
