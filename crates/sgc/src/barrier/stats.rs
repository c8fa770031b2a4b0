//! Barrier Statistics - Invocation and Slow-Path Counters
//!
//! Metrics tracked:
//! - Invocations per barrier kind
//! - SATB enqueues (pre-barrier slow path)
//! - Evacuations started by the write barrier
//! - References resolved to a forwardee
//! - CAS retries caused by stale from-space values

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Barrier kinds, one per toggle flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    Satb,
    Write,
    Read,
    Cas,
    Acmp,
    Clone,
}

impl BarrierKind {
    pub const ALL: [BarrierKind; 6] = [
        BarrierKind::Satb,
        BarrierKind::Write,
        BarrierKind::Read,
        BarrierKind::Cas,
        BarrierKind::Acmp,
        BarrierKind::Clone,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            BarrierKind::Satb => "satb",
            BarrierKind::Write => "write",
            BarrierKind::Read => "read",
            BarrierKind::Cas => "cas",
            BarrierKind::Acmp => "acmp",
            BarrierKind::Clone => "clone",
        }
    }
}

/// BarrierStatsSnapshot - plain copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BarrierStatsSnapshot {
    pub invocations: [u64; 6],
    pub satb_enqueued: u64,
    pub evacuations: u64,
    pub resolved: u64,
    pub cas_retries: u64,
}

impl BarrierStatsSnapshot {
    pub fn invocations_of(&self, kind: BarrierKind) -> u64 {
        self.invocations[kind.index()]
    }

    pub fn total_invocations(&self) -> u64 {
        self.invocations.iter().sum()
    }

    /// Merge another snapshot (for aggregation across runs)
    pub fn merge(&mut self, other: &BarrierStatsSnapshot) {
        for (a, b) in self.invocations.iter_mut().zip(other.invocations.iter()) {
            *a += b;
        }
        self.satb_enqueued += other.satb_enqueued;
        self.evacuations += other.evacuations;
        self.resolved += other.resolved;
        self.cas_retries += other.cas_retries;
    }

    /// Slow-path share of all invocations, in percent
    pub fn slow_path_rate(&self) -> f64 {
        let total = self.total_invocations();
        if total == 0 {
            return 0.0;
        }
        (self.satb_enqueued + self.evacuations + self.cas_retries) as f64 / total as f64 * 100.0
    }
}

/// BarrierStats - thread-safe counters updated from mutator threads
#[derive(Debug, Default)]
pub struct BarrierStats {
    invocations: [AtomicU64; 6],
    satb_enqueued: AtomicU64,
    evacuations: AtomicU64,
    resolved: AtomicU64,
    cas_retries: AtomicU64,
}

impl BarrierStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_invocation(&self, kind: BarrierKind) {
        self.invocations[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_satb_enqueue(&self) {
        self.satb_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evacuation(&self) {
        self.evacuations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BarrierStatsSnapshot {
        let mut invocations = [0; 6];
        for (out, counter) in invocations.iter_mut().zip(self.invocations.iter()) {
            *out = counter.load(Ordering::Relaxed);
        }
        BarrierStatsSnapshot {
            invocations,
            satb_enqueued: self.satb_enqueued.load(Ordering::Relaxed),
            evacuations: self.evacuations.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
        }
    }

    /// One line per barrier kind, for the exit report
    pub fn report(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::from("Barrier invocations:\n");
        for kind in BarrierKind::ALL {
            out.push_str(&format!("  {:<6} {:>12}\n", kind.name(), snap.invocations_of(kind)));
        }
        out.push_str(&format!(
            "  slow paths: {} SATB enqueues, {} evacuations, {} CAS retries\n",
            snap.satb_enqueued, snap.evacuations, snap.cas_retries
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts_per_kind() {
        let stats = BarrierStats::new();
        stats.record_invocation(BarrierKind::Satb);
        stats.record_invocation(BarrierKind::Satb);
        stats.record_invocation(BarrierKind::Clone);
        stats.record_satb_enqueue();

        let snap = stats.snapshot();
        assert_eq!(snap.invocations_of(BarrierKind::Satb), 2);
        assert_eq!(snap.invocations_of(BarrierKind::Clone), 1);
        assert_eq!(snap.total_invocations(), 3);
        assert!((snap.slow_path_rate() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge() {
        let mut a = BarrierStatsSnapshot::default();
        let mut b = BarrierStatsSnapshot::default();
        b.invocations[2] = 5;
        b.resolved = 4;
        a.merge(&b);
        a.merge(&b);
        assert_eq!(a.invocations_of(BarrierKind::Read), 10);
        assert_eq!(a.resolved, 8);
    }
}
