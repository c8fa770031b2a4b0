//! GC Core Module - Heap State and Cycle Management
//!
//! [`HeapState`] is the single owner of everything the collector shares
//! between the control thread, GC workers and mutators: the heap, the
//! marking context, the runtime root sets, heuristics, statistics and the
//! coordination primitives (safepoint, cancellation, pacing).
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!   mutators ─────────▶│          HeapState           │◀──────── control thread
//!   (barriers, alloc)  │  heap · marker · roots       │          (control.rs)
//!                      │  gc_state · cancelled        │
//!                      │  heuristics · policy · stats │
//!                      └──────────────────────────────┘
//!                          ▲                     ▲
//!                 concurrent.rs           degenerated.rs / full.rs
//! ```
//!
//! Cycles:
//! - [`concurrent`]: the normal mark / evacuate / update-refs cycle
//! - [`degenerated`]: finishes a cancelled cycle in one pause
//! - [`full`]: stop-the-world sliding compaction

pub mod breakpoints;
pub mod concurrent;
pub mod control;
pub mod degenerated;
pub mod full;

pub use breakpoints::Breakpoints;
pub use concurrent::CycleOutcome;
pub use control::ControlState;

use crate::barrier::stats::BarrierStats;
use crate::config::GcConfig;
use crate::error::Result;
use crate::heap::Heap;
use crate::heuristics::{self, CollectorPolicy, HeapSnapshot, Heuristics, RegionData};
use crate::logging::{GcEvent, GcLogger, GcLoggerConfig, LogLevel};
use crate::marker::satb::SatbQueueSet;
use crate::marker::gc_threads::WorkGang;
use crate::marker::ConcurrentMark;
use crate::relocate::evac_oom::EvacOomHandler;
use crate::runtime::classes::ClassRegistry;
use crate::runtime::globals::GlobalHandles;
use crate::runtime::pacer::Pacer;
use crate::runtime::safepoint::Safepoint;
use crate::runtime::string_table::StringTable;
use crate::runtime::threads::ThreadRegistry;
use crate::stats::{CycleKind, GcStats, GcTimer, RegionCounters};
use crate::verifier::{self, VerifyPoint};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

// ============================================================================
// GC STATE FLAGS
// ============================================================================

/// Phase flags read by barriers on every access
pub struct GcStateFlags(AtomicU8);

impl GcStateFlags {
    pub const MARKING: u8 = 1;
    pub const EVACUATION: u8 = 2;
    pub const UPDATEREFS: u8 = 4;
    pub const HAS_FORWARDED: u8 = 8;

    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    #[inline]
    pub fn raw(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_set(&self, flags: u8) -> bool {
        self.raw() & flags != 0
    }

    /// Flags only change inside pauses
    pub fn set(&self, flags: u8, on: bool) {
        if on {
            self.0.fetch_or(flags, Ordering::AcqRel);
        } else {
            self.0.fetch_and(!flags, Ordering::AcqRel);
        }
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    #[inline]
    pub fn is_marking(&self) -> bool {
        self.is_set(Self::MARKING)
    }

    #[inline]
    pub fn is_evacuating(&self) -> bool {
        self.is_set(Self::EVACUATION)
    }

    #[inline]
    pub fn is_updating_refs(&self) -> bool {
        self.is_set(Self::UPDATEREFS)
    }

    #[inline]
    pub fn has_forwarded(&self) -> bool {
        self.is_set(Self::HAS_FORWARDED)
    }
}

impl Default for GcStateFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GcStateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::MARKING, "MARKING"),
            (Self::EVACUATION, "EVACUATION"),
            (Self::UPDATEREFS, "UPDATEREFS"),
            (Self::HAS_FORWARDED, "HAS_FORWARDED"),
        ] {
            if self.is_set(flag) {
                names.push(name);
            }
        }
        write!(f, "GcStateFlags({})", names.join("|"))
    }
}

// ============================================================================
// CAUSES AND POINTS
// ============================================================================

/// Why a collection was requested or a cycle cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GcCause {
    AllocationFailure = 1,
    AllocationFailureEvac = 2,
    SystemGc = 3,
    ConcurrentRequest = 4,
    Heuristics = 5,
    UpgradeToFull = 6,
    Shutdown = 7,
}

impl GcCause {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(GcCause::AllocationFailure),
            2 => Some(GcCause::AllocationFailureEvac),
            3 => Some(GcCause::SystemGc),
            4 => Some(GcCause::ConcurrentRequest),
            5 => Some(GcCause::Heuristics),
            6 => Some(GcCause::UpgradeToFull),
            7 => Some(GcCause::Shutdown),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GcCause::AllocationFailure => "Allocation Failure",
            GcCause::AllocationFailureEvac => "Allocation Failure During Evacuation",
            GcCause::SystemGc => "System.gc()",
            GcCause::ConcurrentRequest => "Concurrent GC Request",
            GcCause::Heuristics => "Heuristics",
            GcCause::UpgradeToFull => "Upgrade To Full GC",
            GcCause::Shutdown => "Shutdown",
        }
    }

    pub fn is_allocation_failure(self) -> bool {
        matches!(
            self,
            GcCause::AllocationFailure | GcCause::AllocationFailureEvac
        )
    }
}

impl fmt::Display for GcCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a cancelled concurrent cycle is resumed by a degenerated GC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DegenPoint {
    Unset,
    OutsideCycle,
    Mark,
    Evac,
    UpdateRefs,
}

impl DegenPoint {
    pub const COUNT: usize = 5;

    pub const ALL: [DegenPoint; DegenPoint::COUNT] = [
        DegenPoint::Unset,
        DegenPoint::OutsideCycle,
        DegenPoint::Mark,
        DegenPoint::Evac,
        DegenPoint::UpdateRefs,
    ];

    pub fn index(self) -> usize {
        match self {
            DegenPoint::Unset => 0,
            DegenPoint::OutsideCycle => 1,
            DegenPoint::Mark => 2,
            DegenPoint::Evac => 3,
            DegenPoint::UpdateRefs => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DegenPoint::Unset => "<UNSET>",
            DegenPoint::OutsideCycle => "Outside of Cycle",
            DegenPoint::Mark => "Mark",
            DegenPoint::Evac => "Evacuation",
            DegenPoint::UpdateRefs => "Update Refs",
        }
    }
}

/// Pauses and concurrent phases of all cycle kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcPhase {
    ConcurrentReset,
    InitMark,
    ConcurrentMark,
    FinalMark,
    ConcurrentCleanupEarly,
    ConcurrentEvac,
    InitUpdateRefs,
    ConcurrentUpdateRefs,
    FinalUpdateRefs,
    ConcurrentCleanup,
    Degenerated,
    Full,
}

impl GcPhase {
    pub fn name(self) -> &'static str {
        match self {
            GcPhase::ConcurrentReset => "Concurrent Reset",
            GcPhase::InitMark => "Pause Init Mark",
            GcPhase::ConcurrentMark => "Concurrent Marking",
            GcPhase::FinalMark => "Pause Final Mark",
            GcPhase::ConcurrentCleanupEarly => "Concurrent Cleanup (Immediate Garbage)",
            GcPhase::ConcurrentEvac => "Concurrent Evacuation",
            GcPhase::InitUpdateRefs => "Pause Init Update Refs",
            GcPhase::ConcurrentUpdateRefs => "Concurrent Update References",
            GcPhase::FinalUpdateRefs => "Pause Final Update Refs",
            GcPhase::ConcurrentCleanup => "Concurrent Cleanup",
            GcPhase::Degenerated => "Pause Degenerated GC",
            GcPhase::Full => "Pause Full GC",
        }
    }

    pub fn is_pause(self) -> bool {
        matches!(
            self,
            GcPhase::InitMark
                | GcPhase::FinalMark
                | GcPhase::InitUpdateRefs
                | GcPhase::FinalUpdateRefs
                | GcPhase::Degenerated
                | GcPhase::Full
        )
    }
}

impl fmt::Display for GcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// PROGRESS
// ============================================================================

/// Heap numbers captured before a GC to judge its progress afterwards
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub used_before: usize,
}

impl MetricsSnapshot {
    pub fn take(state: &HeapState) -> Self {
        Self {
            used_before: state.heap.used(),
        }
    }

    /// Enough free space and at least one region's worth reclaimed
    pub fn is_good_progress(&self, state: &HeapState) -> bool {
        let free_actual = state.heap.available();
        let free_expected = state.heap.max_capacity() / 100;
        if free_actual < free_expected {
            log::debug!(
                target: "sgc",
                "No good progress: free {}K below critical {}K",
                free_actual / 1024,
                free_expected / 1024
            );
            return false;
        }
        let used_after = state.heap.used();
        let progress = self.used_before.saturating_sub(used_after);
        if progress < state.heap.region_bytes() {
            log::debug!(
                target: "sgc",
                "No good progress: reclaimed {}K, less than a region",
                progress / 1024
            );
            return false;
        }
        true
    }
}

/// Bookkeeping for one cycle of any kind, from start event to end event
pub(crate) struct CycleScope {
    cycle: u64,
    kind: CycleKind,
    timer: GcTimer,
    metrics: MetricsSnapshot,
}

impl CycleScope {
    pub(crate) fn begin(state: &HeapState, kind: CycleKind, cause: GcCause) -> Self {
        let cycle = state.next_cycle();
        state.heuristics().record_cycle_start();
        log::info!(
            target: "sgc",
            "GC({}) {} cycle start: {}, {}K used",
            cycle,
            kind.name(),
            cause,
            state.heap.used() / 1024
        );
        state.logger.log(GcEvent::CycleStart {
            cycle,
            kind: kind.name().to_string(),
            cause: cause.name().to_string(),
            mode: state.config.heuristics.to_string(),
        });
        Self {
            cycle,
            kind,
            timer: GcTimer::new(),
            metrics: MetricsSnapshot::take(state),
        }
    }

    pub(crate) fn cycle(&self) -> u64 {
        self.cycle
    }

    pub(crate) fn metrics(&self) -> &MetricsSnapshot {
        &self.metrics
    }

    /// Close a completed cycle
    pub(crate) fn end(self, state: &HeapState, kind: CycleKind) {
        let used_after = state.heap.used();
        let duration_ms = self.timer.elapsed_ms();
        {
            let mut h = state.heuristics();
            h.record_cycle_end();
            h.record_peak_occupancy(self.metrics.used_before);
        }
        state.stats.record_cycle(kind);
        log::info!(
            target: "sgc",
            "GC({}) {} cycle end: {}K->{}K, {:.3}ms",
            self.cycle,
            kind.name(),
            self.metrics.used_before / 1024,
            used_after / 1024,
            duration_ms
        );
        state.logger.log(GcEvent::CycleEnd {
            cycle: self.cycle,
            kind: kind.name().to_string(),
            duration_ms,
            used_before: self.metrics.used_before,
            used_after,
        });
        state.log_heap_stats();
        debug_assert!(self.kind == kind || kind == CycleKind::Full);
    }
}

// ============================================================================
// HEAP STATE
// ============================================================================

/// Shared collector state; one per runtime, held in an `Arc`
pub struct HeapState {
    pub(crate) config: GcConfig,
    pub(crate) heap: Heap,
    pub(crate) gc_state: GcStateFlags,
    cancelled: AtomicU8,

    pub(crate) satb: SatbQueueSet,
    pub(crate) marker: ConcurrentMark,
    pub(crate) classes: ClassRegistry,
    pub(crate) strings: StringTable,
    pub(crate) globals: GlobalHandles,
    pub(crate) threads: ThreadRegistry,
    pub(crate) safepoint: Safepoint,

    heuristics: Mutex<Box<dyn Heuristics>>,
    pub(crate) policy: CollectorPolicy,
    pub(crate) stats: GcStats,
    pub(crate) logger: GcLogger,
    pub(crate) pacer: Pacer,
    pub(crate) evac_oom: EvacOomHandler,
    pub(crate) control: ControlState,
    pub(crate) breakpoints: Breakpoints,
    pub(crate) barrier_stats: BarrierStats,
    pub(crate) region_counters: RegionCounters,

    pub(crate) parallel_workers: WorkGang,
    pub(crate) concurrent_workers: WorkGang,

    degen_point: Mutex<DegenPoint>,
    cycle: AtomicU64,
    progress_last_gc: AtomicBool,
}

impl HeapState {
    /// Build the collector for a resolved configuration
    ///
    /// The caller applies heuristics ergonomics first; the configuration is
    /// validated here.
    pub fn new(config: GcConfig) -> Result<Self> {
        config.validate()?;
        let heap = Heap::new(&config)?;
        let region_count = heap.region_count();
        let parallel = config.parallel_workers();
        let concurrent = config.concurrent_workers();

        let logger = GcLogger::new(GcLoggerConfig {
            level: if config.print_gc_details {
                LogLevel::Debug
            } else {
                LogLevel::Info
            },
            console: config.verbose || config.print_gc_details,
            json: config.log_json,
            ..Default::default()
        });

        log::info!(
            target: "sgc",
            "Heap: {}M max, {}M initial, {} regions of {}K; heuristics {}; {} parallel / {} concurrent workers",
            heap.max_capacity() / (1024 * 1024),
            heap.committed() / (1024 * 1024),
            region_count,
            heap.region_bytes() / 1024,
            config.heuristics,
            parallel,
            concurrent
        );

        Ok(Self {
            gc_state: GcStateFlags::new(),
            cancelled: AtomicU8::new(0),
            satb: SatbQueueSet::new(config.satb_buffer_size),
            marker: ConcurrentMark::new(parallel.max(concurrent)),
            classes: ClassRegistry::new(),
            strings: StringTable::new(),
            globals: GlobalHandles::new(),
            threads: ThreadRegistry::new(),
            safepoint: Safepoint::new(),
            heuristics: Mutex::new(heuristics::create(&config)),
            policy: CollectorPolicy::new(),
            stats: GcStats::new(),
            logger,
            pacer: Pacer::new(config.pacing, config.pacing_max_delay_ms),
            evac_oom: EvacOomHandler::new(),
            control: ControlState::new(),
            breakpoints: Breakpoints::new(),
            barrier_stats: BarrierStats::default(),
            region_counters: RegionCounters::new(region_count),
            parallel_workers: WorkGang::new("sgc-parallel", parallel),
            concurrent_workers: WorkGang::new("sgc-conc", concurrent),
            degen_point: Mutex::new(DegenPoint::Unset),
            cycle: AtomicU64::new(0),
            progress_last_gc: AtomicBool::new(false),
            heap,
            config,
        })
    }

    // === Accessors ===

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn gc_state(&self) -> &GcStateFlags {
        &self.gc_state
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn policy(&self) -> &CollectorPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn logger(&self) -> &GcLogger {
        &self.logger
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn barrier_stats(&self) -> &BarrierStats {
        &self.barrier_stats
    }

    pub fn region_counters(&self) -> &RegionCounters {
        &self.region_counters
    }

    pub fn safepoint(&self) -> &Safepoint {
        &self.safepoint
    }

    pub fn heuristics(&self) -> MutexGuard<'_, Box<dyn Heuristics>> {
        self.heuristics.lock()
    }

    /// Cycles started so far, of any kind
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    pub(crate) fn next_cycle(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::Relaxed) + 1
    }

    // === Cancellation ===

    /// Cancel the running cycle
    ///
    /// # Returns
    /// True if this call installed the cancellation; the first cause wins.
    pub fn cancel_gc(&self, cause: GcCause) -> bool {
        let installed = self
            .cancelled
            .compare_exchange(0, cause as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if installed {
            log::info!(target: "sgc", "Cancelling GC: {}", cause);
        }
        installed
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) != 0
    }

    pub fn cancel_cause(&self) -> Option<GcCause> {
        GcCause::from_u8(self.cancelled.load(Ordering::Acquire))
    }

    pub(crate) fn clear_cancelled(&self) {
        self.cancelled.store(0, Ordering::Release);
    }

    pub(crate) fn set_degen_point(&self, point: DegenPoint) {
        *self.degen_point.lock() = point;
    }

    /// Take the recorded degeneration point, leaving it unset
    pub(crate) fn take_degen_point(&self) -> DegenPoint {
        std::mem::replace(&mut *self.degen_point.lock(), DegenPoint::Unset)
    }

    pub fn progress_last_gc(&self) -> bool {
        self.progress_last_gc.load(Ordering::Acquire)
    }

    pub(crate) fn set_progress_last_gc(&self, progress: bool) {
        self.progress_last_gc.store(progress, Ordering::Release);
    }

    // === Heap views for heuristics ===

    pub fn snapshot(&self) -> HeapSnapshot {
        HeapSnapshot {
            capacity: self.heap.max_capacity(),
            available: self.heap.available(),
            used: self.heap.used(),
            bytes_allocated_since_gc_start: self.heap.bytes_allocated_since_gc_start(),
            region_bytes: self.heap.region_bytes(),
        }
    }

    pub(crate) fn region_data(&self) -> Vec<RegionData> {
        self.heap
            .regions()
            .iter()
            .map(|r| RegionData {
                index: r.index(),
                state: r.state(),
                used_bytes: r.used_words() * 8,
                live_bytes: r.live_words() * 8,
            })
            .collect()
    }

    // === Phase helpers ===

    /// Run `f` with every mutator stopped
    ///
    /// All LABs are retired before `f` runs, so every region is parseable
    /// from bottom to top inside the pause.
    pub(crate) fn pause<R>(&self, phase: GcPhase, f: impl FnOnce() -> R) -> R {
        let timer = GcTimer::new();
        self.safepoint.begin();
        self.threads.retire_all_labs(&self.heap);
        let result = f();
        self.safepoint.end();

        let elapsed = timer.elapsed();
        self.stats.record_pause(phase.name(), elapsed);
        self.logger.log(GcEvent::Pause {
            phase: phase.name().to_string(),
            duration_us: elapsed.as_micros() as u64,
        });
        result
    }

    /// Run a concurrent phase, stopping at an armed breakpoint first
    pub(crate) fn concurrent_phase<R>(&self, phase: GcPhase, f: impl FnOnce() -> R) -> R {
        self.breakpoints.at(phase);
        let cycle = self.cycle();
        self.logger.log(GcEvent::PhaseStart {
            phase: phase.name().to_string(),
            cycle,
        });
        let timer = GcTimer::new();
        let result = f();
        let elapsed = timer.elapsed();
        self.stats.record_phase(phase.name(), elapsed);
        self.logger.log(GcEvent::PhaseEnd {
            phase: phase.name().to_string(),
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            cycle,
        });
        result
    }

    /// Verify the heap when `ShenandoahVerify` is on; only inside a pause
    pub(crate) fn verify(&self, point: VerifyPoint) {
        if self.config.verify {
            verifier::verify_or_abort(self, point);
        }
    }

    /// Rebuild the free set; caller is inside a pause
    pub(crate) fn rebuild_free_set(&self) {
        self.heap.lock().rebuild(&self.heap);
    }

    /// Recycle trash regions under the heap lock
    pub(crate) fn recycle_trash(&self) -> usize {
        let count = self.heap.lock().recycle_trash(&self.heap);
        if count > 0 {
            log::debug!(target: "sgc", "Recycled {} trash regions", count);
        }
        count
    }

    /// Region sampling status word
    pub(crate) fn sampling_status(&self) -> u64 {
        use crate::stats::region_counters::{STATUS_EVACUATING, STATUS_MARKING};
        let mut status = 0;
        if self.gc_state.is_marking() {
            status |= STATUS_MARKING;
        }
        if self.gc_state.is_evacuating() {
            status |= STATUS_EVACUATING;
        }
        status
    }

    pub(crate) fn log_heap_stats(&self) {
        let used = self.heap.used();
        let total = self.heap.max_capacity();
        self.logger.log(GcEvent::HeapStats {
            used_bytes: used,
            total_bytes: total,
            utilization: used as f64 / total.max(1) as f64,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KB;

    pub(crate) fn small_config() -> GcConfig {
        GcConfig {
            max_heap_size: 64 * 64 * KB,
            initial_heap_size: 64 * 64 * KB,
            region_size: Some(64 * KB),
            min_tlab_size: KB,
            conc_gc_threads: Some(2),
            parallel_gc_threads: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_state_flags() {
        let flags = GcStateFlags::new();
        flags.set(GcStateFlags::MARKING | GcStateFlags::HAS_FORWARDED, true);
        assert!(flags.is_marking() && flags.has_forwarded());
        flags.set(GcStateFlags::MARKING, false);
        assert!(!flags.is_marking());
        assert_eq!(format!("{:?}", flags), "GcStateFlags(HAS_FORWARDED)");
    }

    #[test]
    fn test_first_cancel_cause_wins() {
        let state = HeapState::new(small_config()).unwrap();
        assert!(state.cancel_gc(GcCause::AllocationFailureEvac));
        assert!(!state.cancel_gc(GcCause::AllocationFailure));
        assert_eq!(state.cancel_cause(), Some(GcCause::AllocationFailureEvac));
        state.clear_cancelled();
        assert!(!state.is_cancelled());
        assert_eq!(state.cancel_cause(), None);
    }

    #[test]
    fn test_degen_point_is_taken_once() {
        let state = HeapState::new(small_config()).unwrap();
        state.set_degen_point(DegenPoint::Evac);
        assert_eq!(state.take_degen_point(), DegenPoint::Evac);
        assert_eq!(state.take_degen_point(), DegenPoint::Unset);
    }

    #[test]
    fn test_degen_point_indices_are_dense() {
        for (i, point) in DegenPoint::ALL.iter().enumerate() {
            assert_eq!(point.index(), i);
        }
    }

    #[test]
    fn test_pause_with_no_mutators_records_stats() {
        let state = HeapState::new(small_config()).unwrap();
        let v = state.pause(GcPhase::InitMark, || 7);
        assert_eq!(v, 7);
        assert_eq!(state.stats.phase_count("Pause Init Mark"), 1);
        assert_eq!(state.safepoint.count(), 1);
    }
}
