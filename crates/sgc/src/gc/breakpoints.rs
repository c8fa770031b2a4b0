//! Concurrent Phase Breakpoints
//!
//! Tests stop the control thread at the start of a concurrent phase, act
//! on the heap while the phase is pending, then let the cycle go on:
//!
//! ```text
//!  test thread                         control thread
//!  arm(ConcurrentMark)
//!  request_concurrent_cycle() ───────▶ init mark pause
//!                                      at(ConcurrentMark): parks
//!  wait_until_reached(..) ◀──────────
//!  ... stores under MARKING ...
//!  release() ────────────────────────▶ marking runs
//! ```

use super::GcPhase;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BreakpointState {
    armed: Option<GcPhase>,
    reached: Option<GcPhase>,
    disabled: bool,
}

pub struct Breakpoints {
    inner: Mutex<BreakpointState>,
    cond: Condvar,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BreakpointState::default()),
            cond: Condvar::new(),
        }
    }

    /// Stop the control thread the next time it enters `phase`
    pub fn arm(&self, phase: GcPhase) {
        let mut inner = self.inner.lock();
        inner.armed = Some(phase);
        inner.reached = None;
    }

    pub fn is_armed(&self) -> bool {
        self.inner.lock().armed.is_some()
    }

    /// Wait until the control thread parks at `phase`
    ///
    /// # Returns
    /// False on timeout
    pub fn wait_until_reached(&self, phase: GcPhase, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.reached != Some(phase) {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                return inner.reached == Some(phase);
            }
        }
        true
    }

    /// Disarm and let a parked control thread continue
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        inner.armed = None;
        inner.reached = None;
        self.cond.notify_all();
    }

    /// Release for good; used at shutdown
    pub fn disable(&self) {
        let mut inner = self.inner.lock();
        inner.disabled = true;
        inner.armed = None;
        self.cond.notify_all();
    }

    /// Called by the control thread on entering a concurrent phase
    pub(crate) fn at(&self, phase: GcPhase) {
        let mut inner = self.inner.lock();
        if inner.disabled || inner.armed != Some(phase) {
            return;
        }
        log::debug!(target: "sgc", "Breakpoint reached: {}", phase);
        inner.reached = Some(phase);
        self.cond.notify_all();
        while !inner.disabled && inner.armed == Some(phase) {
            self.cond.wait(&mut inner);
        }
    }
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_unarmed_phase_passes() {
        let bp = Breakpoints::new();
        bp.arm(GcPhase::ConcurrentEvac);
        bp.at(GcPhase::ConcurrentMark);
        assert!(!bp.wait_until_reached(GcPhase::ConcurrentMark, Duration::from_millis(1)));
    }

    #[test]
    fn test_park_and_release() {
        let bp = Arc::new(Breakpoints::new());
        bp.arm(GcPhase::ConcurrentMark);

        let control = {
            let bp = Arc::clone(&bp);
            thread::spawn(move || bp.at(GcPhase::ConcurrentMark))
        };

        assert!(bp.wait_until_reached(GcPhase::ConcurrentMark, Duration::from_secs(5)));
        assert!(!control.is_finished());
        bp.release();
        control.join().unwrap();
        assert!(!bp.is_armed());
    }

    #[test]
    fn test_disable_releases_parked_thread() {
        let bp = Arc::new(Breakpoints::new());
        bp.arm(GcPhase::ConcurrentUpdateRefs);
        let control = {
            let bp = Arc::clone(&bp);
            thread::spawn(move || bp.at(GcPhase::ConcurrentUpdateRefs))
        };
        assert!(bp.wait_until_reached(GcPhase::ConcurrentUpdateRefs, Duration::from_secs(5)));
        bp.disable();
        control.join().unwrap();
    }
}
