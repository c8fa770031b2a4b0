//! Pacer - Allocation Back-Pressure During Concurrent Phases
//!
//! At the start of concurrent mark, evacuation and update-refs the pacer
//! computes a tax rate: words of GC work per word of free memory. The
//! allocation budget starts at a slack share of free memory and is
//! replenished as GC workers report progress. Mutators claim from the
//! budget before each allocation; when it runs dry they stall, up to
//! `PacingMaxDelay`, then claim anyway.
//!
//! Budget and tax are in words. A negative budget means mutators are
//! ahead of the collector.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Share of free memory mutators may allocate before paying tax, in percent
const PACING_SLACK: usize = 10;

/// Budget outside of paced phases
const IDLE_BUDGET: isize = isize::MAX / 4;

pub struct Pacer {
    enabled: bool,
    max_delay: Duration,
    budget: AtomicIsize,
    /// f64 bits of words of allocation granted per word of progress
    grant_per_work: AtomicU64,
    paced: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
    total_delay_us: AtomicU64,
    stalls: AtomicU64,
}

impl Pacer {
    pub fn new(enabled: bool, max_delay_ms: u64) -> Self {
        Self {
            enabled,
            max_delay: Duration::from_millis(max_delay_ms),
            budget: AtomicIsize::new(IDLE_BUDGET),
            grant_per_work: AtomicU64::new(1.0f64.to_bits()),
            paced: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            total_delay_us: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start a paced phase with `work_words` of GC work and `free_words` free
    pub fn setup(&self, phase: &str, work_words: usize, free_words: usize) {
        if !self.enabled {
            return;
        }
        let slack = free_words * PACING_SLACK / 100;
        let taxable = free_words.saturating_sub(slack).max(1);
        let grant = taxable as f64 / work_words.max(1) as f64;

        self.grant_per_work.store(grant.to_bits(), Ordering::Relaxed);
        self.budget.store(slack as isize, Ordering::Release);
        self.paced.store(true, Ordering::Release);
        self.notify();

        log::debug!(
            target: "sgc",
            "Pacer for {}: work {}K, free {}K, budget {}K, {:.2} words granted per word of work",
            phase,
            work_words * 8 / 1024,
            free_words * 8 / 1024,
            slack * 8 / 1024,
            grant
        );
    }

    /// Leave paced mode; allocations are never delayed
    pub fn setup_for_idle(&self) {
        self.paced.store(false, Ordering::Release);
        self.budget.store(IDLE_BUDGET, Ordering::Release);
        self.notify();
    }

    /// GC workers completed `work_words` of work
    pub fn report_progress(&self, work_words: usize) {
        if !self.enabled || !self.paced.load(Ordering::Acquire) {
            return;
        }
        let grant = f64::from_bits(self.grant_per_work.load(Ordering::Relaxed));
        let words = (work_words as f64 * grant) as isize;
        if words > 0 {
            self.budget.fetch_add(words, Ordering::AcqRel);
            self.notify();
        }
    }

    pub fn budget(&self) -> isize {
        self.budget.load(Ordering::Acquire)
    }

    /// Claim `words` if the budget covers them
    pub fn claim_for_alloc(&self, words: usize, force: bool) -> bool {
        let words = words as isize;
        let mut cur = self.budget.load(Ordering::Acquire);
        loop {
            if cur < words && !force {
                return false;
            }
            match self.budget.compare_exchange_weak(
                cur,
                cur - words,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Claim `words`, stalling up to the max delay if the budget is exhausted
    ///
    /// The caller must be in a safe region while this waits.
    pub fn pace_for_alloc(&self, words: usize) {
        if !self.enabled || self.claim_for_alloc(words, false) {
            return;
        }

        let start = Instant::now();
        let deadline = start + self.max_delay;
        let mut guard = self.lock.lock();
        loop {
            if self.claim_for_alloc(words, false) {
                break;
            }
            if !self.paced.load(Ordering::Acquire)
                || self.cond.wait_until(&mut guard, deadline).timed_out()
            {
                self.claim_for_alloc(words, true);
                break;
            }
        }
        drop(guard);

        self.stalls.fetch_add(1, Ordering::Relaxed);
        self.total_delay_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    /// Does an allocation of `words` need to stall?
    pub fn needs_pacing(&self, words: usize) -> bool {
        self.enabled && self.budget() < words as isize
    }

    pub fn total_delay(&self) -> Duration {
        Duration::from_micros(self.total_delay_us.load(Ordering::Relaxed))
    }

    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}
