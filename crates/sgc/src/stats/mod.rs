//! Stats Module - GC Performance Monitoring
//!
//! Collects collector statistics for tuning and for the exit report:
//! - pause times (min, max, mean, percentiles);
//! - time spent in each pause and concurrent phase;
//! - cycle counts by kind;
//! - bytes evacuated and reclaimed.

pub mod histogram;
pub mod region_counters;
pub mod timer;

pub use histogram::Histogram;
pub use region_counters::RegionCounters;
pub use timer::{GcTimer, ScopedTimer};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Kind of a completed collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Concurrent,
    Degenerated,
    Full,
}

impl CycleKind {
    pub fn name(self) -> &'static str {
        match self {
            CycleKind::Concurrent => "Concurrent",
            CycleKind::Degenerated => "Degenerated",
            CycleKind::Full => "Full",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PhaseTime {
    count: u64,
    total_us: u64,
    max_us: u64,
}

/// GcStats - central repository for collector metrics
pub struct GcStats {
    concurrent_cycles: AtomicU64,
    degenerated_cycles: AtomicU64,
    full_cycles: AtomicU64,
    cancelled_cycles: AtomicU64,
    /// Pause durations in microseconds
    pauses: Histogram,
    phases: Mutex<IndexMap<&'static str, PhaseTime>>,
    bytes_evacuated: AtomicUsize,
    bytes_reclaimed: AtomicUsize,
    regions_trashed: AtomicUsize,
    start_time: Instant,
}

impl GcStats {
    pub fn new() -> Self {
        Self {
            concurrent_cycles: AtomicU64::new(0),
            degenerated_cycles: AtomicU64::new(0),
            full_cycles: AtomicU64::new(0),
            cancelled_cycles: AtomicU64::new(0),
            pauses: Histogram::new(),
            phases: Mutex::new(IndexMap::new()),
            bytes_evacuated: AtomicUsize::new(0),
            bytes_reclaimed: AtomicUsize::new(0),
            regions_trashed: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_cycle(&self, kind: CycleKind) {
        let counter = match kind {
            CycleKind::Concurrent => &self.concurrent_cycles,
            CycleKind::Degenerated => &self.degenerated_cycles,
            CycleKind::Full => &self.full_cycles,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pause(&self, phase: &'static str, duration: Duration) {
        self.pauses.record(duration.as_micros() as u64);
        self.record_phase(phase, duration);
    }

    pub fn record_phase(&self, phase: &'static str, duration: Duration) {
        let us = duration.as_micros() as u64;
        let mut phases = self.phases.lock();
        let t = phases.entry(phase).or_default();
        t.count += 1;
        t.total_us += us;
        t.max_us = t.max_us.max(us);
    }

    pub fn record_evacuated(&self, bytes: usize) {
        self.bytes_evacuated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_reclaimed(&self, bytes: usize, regions: usize) {
        self.bytes_reclaimed.fetch_add(bytes, Ordering::Relaxed);
        self.regions_trashed.fetch_add(regions, Ordering::Relaxed);
    }

    pub fn pause_histogram(&self) -> &Histogram {
        &self.pauses
    }

    pub fn cycles(&self, kind: CycleKind) -> u64 {
        match kind {
            CycleKind::Concurrent => self.concurrent_cycles.load(Ordering::Relaxed),
            CycleKind::Degenerated => self.degenerated_cycles.load(Ordering::Relaxed),
            CycleKind::Full => self.full_cycles.load(Ordering::Relaxed),
        }
    }

    pub fn total_cycles(&self) -> u64 {
        self.cycles(CycleKind::Concurrent)
            + self.cycles(CycleKind::Degenerated)
            + self.cycles(CycleKind::Full)
    }

    /// Times a phase has run
    pub fn phase_count(&self, phase: &str) -> u64 {
        self.phases.lock().get(phase).map(|t| t.count).unwrap_or(0)
    }

    /// Snapshot for reports and `--stats-json`
    pub fn summary(&self, heap_used: usize, heap_capacity: usize) -> GcSummary {
        GcSummary {
            concurrent_cycles: self.cycles(CycleKind::Concurrent),
            degenerated_cycles: self.cycles(CycleKind::Degenerated),
            full_cycles: self.cycles(CycleKind::Full),
            cancelled_cycles: self.cancelled_cycles.load(Ordering::Relaxed),
            pauses: self.pauses.count(),
            avg_pause_ms: self.pauses.mean() as f64 / 1000.0,
            max_pause_ms: self.pauses.max() as f64 / 1000.0,
            p99_pause_ms: self.pauses.p99() as f64 / 1000.0,
            total_pause_ms: self.pauses.sum() as f64 / 1000.0,
            bytes_evacuated: self.bytes_evacuated.load(Ordering::Relaxed),
            bytes_reclaimed: self.bytes_reclaimed.load(Ordering::Relaxed),
            regions_trashed: self.regions_trashed.load(Ordering::Relaxed),
            heap_used,
            heap_capacity,
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }

    /// Per-phase timing table
    pub fn phase_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<36} {:>8} {:>12} {:>12}",
            "Phase", "Count", "Total (ms)", "Max (ms)"
        );
        for (phase, t) in self.phases.lock().iter() {
            let _ = writeln!(
                out,
                "{:<36} {:>8} {:>12.3} {:>12.3}",
                phase,
                t.count,
                t.total_us as f64 / 1000.0,
                t.max_us as f64 / 1000.0
            );
        }
        out
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcSummary {
    pub concurrent_cycles: u64,
    pub degenerated_cycles: u64,
    pub full_cycles: u64,
    pub cancelled_cycles: u64,
    pub pauses: u64,
    pub avg_pause_ms: f64,
    pub max_pause_ms: f64,
    pub p99_pause_ms: f64,
    pub total_pause_ms: f64,
    pub bytes_evacuated: usize,
    pub bytes_reclaimed: usize,
    pub regions_trashed: usize,
    pub heap_used: usize,
    pub heap_capacity: usize,
    pub uptime_secs: f64,
}
