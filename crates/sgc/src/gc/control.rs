//! Control Thread - Deciding What Cycle Runs Next
//!
//! A single control thread owns all cycles. Mutators and the runtime talk
//! to it through [`ControlState`]: allocation failures, explicit GC
//! requests, concurrent cycle requests and shutdown. Between requests it
//! asks the heuristics whether a concurrent cycle should start.
//!
//! Priority, highest first:
//! 1. Shutdown
//! 2. Allocation failure: degenerated GC, or Full GC when degeneration is
//!    not allowed
//! 3. Explicit GC: concurrent or Full, per `ExplicitGCInvokesConcurrent`
//! 4. Requested concurrent cycle
//! 5. Heuristics trigger
//!
//! While idle it uncommits long-empty regions and samples region counters.
//!
//! Waiting mutators are released after the next completed GC. Callers that
//! are attached mutators must wait inside a safe region, or the GC they
//! wait for could never stop them.

use super::{concurrent, degenerated, full, CycleOutcome, DegenPoint, GcCause, HeapState};
use crate::error::{Result, SgcError};
use crate::logging::GcEvent;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ControlRequests {
    alloc_failure_pending: bool,
    explicit: Option<GcCause>,
    explicit_running: bool,
    concurrent_requested: bool,
    shutdown: bool,
    gcs_completed: u64,
    explicit_completed: u64,
}

/// What the control thread does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Leave the loop
    Shutdown,
    AllocFailure,
    Explicit(GcCause),
    Concurrent(GcCause),
}

pub struct ControlState {
    requests: Mutex<ControlRequests>,
    /// Wakes the control thread
    control_cond: Condvar,
    /// Wakes threads waiting for a GC to complete
    waiters_cond: Condvar,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(ControlRequests::default()),
            control_cond: Condvar::new(),
            waiters_cond: Condvar::new(),
        }
    }

    // === Requests from mutators and the runtime ===

    /// Report a failed allocation of `words` and wait for the next GC
    ///
    /// # Errors
    /// `ShuttingDown` if the runtime stops while waiting
    pub fn handle_alloc_failure(&self, state: &HeapState, words: usize) -> Result<()> {
        let mut req = self.requests.lock();
        if req.shutdown {
            return Err(SgcError::ShuttingDown);
        }
        let start = req.gcs_completed;
        if !req.alloc_failure_pending {
            state.logger.log(GcEvent::AllocationFailure {
                size: words * 8,
                heap_used: state.heap.used(),
            });
        }
        req.alloc_failure_pending = true;
        state.cancel_gc(GcCause::AllocationFailure);
        self.control_cond.notify_all();

        while req.gcs_completed == start && !req.shutdown {
            self.waiters_cond.wait(&mut req);
        }
        if req.gcs_completed == start {
            return Err(SgcError::ShuttingDown);
        }
        Ok(())
    }

    /// Request an explicit GC and wait until it completes
    ///
    /// Returns at once when explicit GC is disabled.
    pub fn request_explicit(&self, state: &HeapState, cause: GcCause) -> Result<()> {
        if state.config.disable_explicit_gc {
            log::debug!(target: "sgc", "Ignoring explicit GC request: {}", cause);
            return Ok(());
        }
        let mut req = self.requests.lock();
        if req.shutdown {
            return Err(SgcError::ShuttingDown);
        }
        let start = req.explicit_completed;
        // A request already running may have scanned before our caller's
        // last store, so wait for one that starts after it
        let target = if req.explicit_running { start + 2 } else { start + 1 };
        req.explicit = Some(cause);
        self.control_cond.notify_all();

        while req.explicit_completed < target && !req.shutdown {
            self.waiters_cond.wait(&mut req);
        }
        if req.explicit_completed < target {
            return Err(SgcError::ShuttingDown);
        }
        Ok(())
    }

    /// Ask for a concurrent cycle without waiting for it
    pub fn request_concurrent(&self) {
        let mut req = self.requests.lock();
        req.concurrent_requested = true;
        self.control_cond.notify_all();
    }

    /// Stop the control loop and release every waiter
    pub fn request_shutdown(&self, state: &HeapState) {
        let mut req = self.requests.lock();
        req.shutdown = true;
        state.cancel_gc(GcCause::Shutdown);
        state.breakpoints.disable();
        self.control_cond.notify_all();
        self.waiters_cond.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.requests.lock().shutdown
    }

    /// GCs of any kind completed by the control loop
    pub fn gcs_completed(&self) -> u64 {
        self.requests.lock().gcs_completed
    }

    // === Control loop ===

    /// Run the control loop until shutdown; called on the control thread
    pub fn run(&self, state: &HeapState) {
        log::debug!(target: "sgc", "Control thread started");
        let interval = Duration::from_millis(state.config.control_interval_ms.max(1));
        let mut last_sample = Instant::now();

        loop {
            let action = self.next_request().or_else(|| {
                let snapshot = state.snapshot();
                state
                    .heuristics()
                    .should_start_normal_gc(&snapshot)
                    .then_some(Action::Concurrent(GcCause::Heuristics))
            });

            match action {
                Some(Action::Shutdown) => break,
                Some(action) => {
                    if !self.service(state, action) {
                        if state.cancel_cause() == Some(GcCause::Shutdown) {
                            break;
                        }
                        continue;
                    }
                    self.complete(state);
                }
                None => {
                    self.idle_work(state, &mut last_sample);
                    let mut req = self.requests.lock();
                    if !req.shutdown
                        && !req.alloc_failure_pending
                        && req.explicit.is_none()
                        && !req.concurrent_requested
                    {
                        self.control_cond.wait_for(&mut req, interval);
                    }
                }
            }
        }

        let mut req = self.requests.lock();
        req.shutdown = true;
        self.waiters_cond.notify_all();
        log::debug!(target: "sgc", "Control thread stopped");
    }

    /// Pick the highest priority request
    ///
    /// # Returns
    /// `None` when nothing was requested
    fn next_request(&self) -> Option<Action> {
        let mut req = self.requests.lock();
        if req.shutdown {
            return Some(Action::Shutdown);
        }
        if req.alloc_failure_pending {
            return Some(Action::AllocFailure);
        }
        if let Some(cause) = req.explicit.take() {
            req.explicit_running = true;
            return Some(Action::Explicit(cause));
        }
        if req.concurrent_requested {
            req.concurrent_requested = false;
            return Some(Action::Concurrent(GcCause::ConcurrentRequest));
        }
        None
    }

    /// Run the GC for `action`
    ///
    /// # Returns
    /// True if a GC completed; false if a concurrent cycle was cancelled
    fn service(&self, state: &HeapState, action: Action) -> bool {
        match action {
            // The loop stops before servicing it
            Action::Shutdown => false,
            Action::AllocFailure => {
                state.heuristics().record_allocation_failure_gc();
                let degenerate = state.heuristics().should_degenerate_cycle();
                if degenerate {
                    let point = match state.take_degen_point() {
                        DegenPoint::Unset => DegenPoint::OutsideCycle,
                        p => p,
                    };
                    state.policy.record_alloc_failure_to_degenerated(point);
                    degenerated::run(state, point, GcCause::AllocationFailure);
                } else {
                    state.take_degen_point();
                    state.policy.record_alloc_failure_to_full();
                    full::run(state, GcCause::AllocationFailure);
                }
                true
            }
            Action::Explicit(cause) => {
                state.heuristics().record_explicit_gc();
                let concurrent = state.config.explicit_gc_invokes_concurrent
                    && state.heuristics().can_do_concurrent();
                if concurrent {
                    state.policy.record_explicit_to_concurrent();
                    self.service_concurrent(state, cause)
                } else {
                    state.policy.record_explicit_to_full();
                    full::run(state, cause);
                    true
                }
            }
            Action::Concurrent(cause) => {
                if state.heuristics().can_do_concurrent() {
                    self.service_concurrent(state, cause)
                } else {
                    state.policy.record_implicit_to_full();
                    full::run(state, cause);
                    true
                }
            }
        }
    }

    fn service_concurrent(&self, state: &HeapState, cause: GcCause) -> bool {
        match concurrent::run(state, cause) {
            CycleOutcome::Completed => true,
            CycleOutcome::Cancelled(cancel) => {
                if cancel.is_allocation_failure() {
                    self.requests.lock().alloc_failure_pending = true;
                }
                false
            }
        }
    }

    /// Release waiters after a completed GC
    fn complete(&self, state: &HeapState) {
        if state.cancel_cause() != Some(GcCause::Shutdown) {
            state.clear_cancelled();
        }
        state.pacer.setup_for_idle();

        let mut req = self.requests.lock();
        req.alloc_failure_pending = false;
        req.gcs_completed += 1;
        if req.explicit_running {
            req.explicit_running = false;
            req.explicit_completed += 1;
        }
        self.waiters_cond.notify_all();
    }

    fn idle_work(&self, state: &HeapState, last_sample: &mut Instant) {
        if state.config.uncommit {
            let uncommitted = state.heap.uncommit_regions(state.config.uncommit_delay_ms);
            if uncommitted > 0 {
                log::debug!(target: "sgc", "Uncommitted {} regions", uncommitted);
            }
        }
        if state.config.region_sampling
            && last_sample.elapsed() >= Duration::from_millis(state.config.region_sampling_rate_ms)
        {
            state
                .region_counters
                .sample(&state.heap, state.sampling_status());
            *last_sample = Instant::now();
        }
    }
}
