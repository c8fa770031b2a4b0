//! Collector Policy - Cycle Outcome Counters
//!
//! Counts how each collection came about and ended, and renders the
//! statistics block printed at exit with `PrintGCDetails`.

use crate::gc::DegenPoint;
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct CollectorPolicy {
    success_concurrent: AtomicUsize,
    success_degenerated: AtomicUsize,
    success_full: AtomicUsize,
    alloc_failure_degenerated: AtomicUsize,
    alloc_failure_full: AtomicUsize,
    degenerated_upgrade_to_full: AtomicUsize,
    explicit_concurrent: AtomicUsize,
    explicit_full: AtomicUsize,
    implicit_full: AtomicUsize,
    degen_points: [AtomicUsize; DegenPoint::COUNT],
}

impl CollectorPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success_concurrent(&self) {
        self.success_concurrent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success_degenerated(&self) {
        self.success_degenerated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success_full(&self) {
        self.success_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alloc_failure_to_degenerated(&self, point: DegenPoint) {
        self.alloc_failure_degenerated.fetch_add(1, Ordering::Relaxed);
        self.degen_points[point.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alloc_failure_to_full(&self) {
        self.alloc_failure_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degenerated_upgrade_to_full(&self) {
        self.degenerated_upgrade_to_full
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_explicit_to_concurrent(&self) {
        self.explicit_concurrent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_explicit_to_full(&self) {
        self.explicit_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_implicit_to_full(&self) {
        self.implicit_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_concurrent(&self) -> usize {
        self.success_concurrent.load(Ordering::Relaxed)
    }

    pub fn success_degenerated(&self) -> usize {
        self.success_degenerated.load(Ordering::Relaxed)
    }

    pub fn success_full(&self) -> usize {
        self.success_full.load(Ordering::Relaxed)
    }

    pub fn alloc_failure_degenerated(&self) -> usize {
        self.alloc_failure_degenerated.load(Ordering::Relaxed)
    }

    pub fn alloc_failure_full(&self) -> usize {
        self.alloc_failure_full.load(Ordering::Relaxed)
    }

    pub fn degenerated_upgrade_to_full(&self) -> usize {
        self.degenerated_upgrade_to_full.load(Ordering::Relaxed)
    }

    pub fn explicit_full(&self) -> usize {
        self.explicit_full.load(Ordering::Relaxed)
    }

    pub fn explicit_concurrent(&self) -> usize {
        self.explicit_concurrent.load(Ordering::Relaxed)
    }

    pub fn degenerated_at(&self, point: DegenPoint) -> usize {
        self.degen_points[point.index()].load(Ordering::Relaxed)
    }

    /// Statistics block for the exit report
    pub fn gc_stats_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Under allocation pressure, concurrent cycles may cancel, and either continue cycle"
        );
        let _ = writeln!(
            out,
            "under stop-the-world pause or result in stop-the-world Full GC. Increase heap size,"
        );
        let _ = writeln!(
            out,
            "tune GC heuristics, set more concurrent threads, or decrease allocation rate if you"
        );
        let _ = writeln!(out, "have significant Degenerated or Full GCs.");
        let _ = writeln!(out);

        let concurrent = self.success_concurrent();
        let explicit_concurrent = self.explicit_concurrent();
        let _ = writeln!(out, "{:>5} successful concurrent GCs", concurrent);
        let _ = writeln!(out, "{:>8} invoked explicitly", explicit_concurrent);
        let _ = writeln!(
            out,
            "{:>8} invoked implicitly",
            concurrent.saturating_sub(explicit_concurrent)
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "{:>5} Degenerated GCs", self.success_degenerated());
        let _ = writeln!(
            out,
            "{:>8} caused by allocation failure",
            self.alloc_failure_degenerated()
        );
        for point in DegenPoint::ALL {
            let n = self.degenerated_at(point);
            if n > 0 {
                let _ = writeln!(out, "{:>11} happened at {}", n, point.name());
            }
        }
        let _ = writeln!(
            out,
            "{:>8} upgraded to Full GC",
            self.degenerated_upgrade_to_full()
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "{:>5} Full GCs", self.success_full());
        let _ = writeln!(out, "{:>8} invoked explicitly", self.explicit_full());
        let _ = writeln!(
            out,
            "{:>8} invoked implicitly",
            self.implicit_full.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "{:>8} caused by allocation failure",
            self.alloc_failure_full()
        );
        let _ = writeln!(
            out,
            "{:>8} upgraded from Degenerated GC",
            self.degenerated_upgrade_to_full()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_breakdown() {
        let policy = CollectorPolicy::new();
        policy.record_success_concurrent();
        policy.record_success_concurrent();
        policy.record_explicit_to_concurrent();
        policy.record_alloc_failure_to_degenerated(DegenPoint::Evac);
        policy.record_success_degenerated();
        policy.record_alloc_failure_to_full();
        policy.record_success_full();

        let report = policy.gc_stats_report();
        assert!(report.starts_with("Under allocation pressure"));
        assert!(report.contains("    2 successful concurrent GCs"));
        assert!(report.contains("       1 invoked explicitly"));
        assert!(report.contains("happened at Evacuation"));
        assert!(report.contains("    1 Full GCs"));
        assert_eq!(policy.degenerated_at(DegenPoint::Evac), 1);
    }
}
