//! Evacuation OOM Protocol
//!
//! A thread that cannot allocate a copy must not return the from-space
//! object while another thread may still be installing a copy of it. The
//! handler keeps a count of threads inside an evacuation, plus an OOM bit:
//!
//! ```text
//!  state = [ OOM | count of threads evacuating ]
//!
//!  enter():      OOM set?   -> wait until count == 0, refuse
//!                otherwise  -> count += 1
//!  handle_oom(): count -= 1, set OOM, wait until count == 0
//!  clear():      in a pause, before evacuation restarts
//! ```
//!
//! Once the OOM bit is up nobody starts a new copy, and everyone who was
//! mid-copy has either installed its forwarding or given up. From then on
//! `resolve(obj)` is stable until the degenerated cycle clears the bit.

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicUsize, Ordering};

const OOM_BIT: usize = 1 << (usize::BITS - 1);

pub struct EvacOomHandler {
    state: AtomicUsize,
}

impl EvacOomHandler {
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    /// Enter an evacuation scope
    ///
    /// # Returns
    /// * `true` - the caller may copy and must call [`leave`](Self::leave)
    /// * `false` - evacuation already failed; the caller must only resolve
    pub fn enter(&self) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if cur & OOM_BIT != 0 {
                self.wait_for_no_evac_threads();
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn leave(&self) {
        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & !OOM_BIT > 0, "leave without enter");
    }

    /// Leave the scope after a failed copy allocation and wait for
    /// everybody else to leave theirs
    pub fn handle_oom(&self) {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            debug_assert!(cur & !OOM_BIT > 0, "handle_oom outside of scope");
            let new = (cur - 1) | OOM_BIT;
            match self
                .state
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.wait_for_no_evac_threads();
    }

    /// Reset the protocol; only inside a pause with no evacuation running
    pub fn clear(&self) {
        debug_assert_eq!(self.state.load(Ordering::Acquire) & !OOM_BIT, 0);
        self.state.store(0, Ordering::Release);
    }

    pub fn is_oom(&self) -> bool {
        self.state.load(Ordering::Acquire) & OOM_BIT != 0
    }

    /// Threads currently inside an evacuation scope
    pub fn evacuating_threads(&self) -> usize {
        self.state.load(Ordering::Acquire) & !OOM_BIT
    }

    fn wait_for_no_evac_threads(&self) {
        let backoff = Backoff::new();
        while self.state.load(Ordering::Acquire) & !OOM_BIT != 0 {
            backoff.snooze();
        }
    }
}

impl Default for EvacOomHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_enter_leave_counts() {
        let h = EvacOomHandler::new();
        assert!(h.enter());
        assert!(h.enter());
        assert_eq!(h.evacuating_threads(), 2);
        h.leave();
        h.leave();
        assert_eq!(h.evacuating_threads(), 0);
        assert!(!h.is_oom());
    }

    #[test]
    fn test_oom_refuses_new_scopes_until_cleared() {
        let h = EvacOomHandler::new();
        assert!(h.enter());
        h.handle_oom();
        assert!(h.is_oom());
        assert!(!h.enter());

        h.clear();
        assert!(h.enter());
        h.leave();
    }

    #[test]
    fn test_handle_oom_waits_for_other_copiers() {
        let h = Arc::new(EvacOomHandler::new());
        assert!(h.enter());

        let other = {
            let h = Arc::clone(&h);
            std::thread::spawn(move || {
                assert!(h.enter());
                h.handle_oom();
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!other.is_finished(), "must wait while a copier is in scope");
        h.leave();
        other.join().unwrap();
        assert_eq!(h.evacuating_threads(), 0);
    }
}
