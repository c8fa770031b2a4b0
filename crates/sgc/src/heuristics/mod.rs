//! Heuristics - When to Collect and What to Evacuate
//!
//! A [`Heuristics`] implementation decides:
//! - whether the control thread should start a concurrent cycle;
//! - which regions form the collection set at final mark;
//! - whether an allocation failure degenerates or goes to Full GC;
//! - whether the cycle unloads classes.
//!
//! Collection-set selection is shared ([`Heuristics::choose_collection_set`]):
//! regions with no live data are reclaimed immediately, and the remaining
//! candidates, ordered by garbage, are offered to the mode's
//! [`Heuristics::choose_from_candidates`].
//!
//! | Mode | Trigger | Collection set |
//! |------|---------|----------------|
//! | adaptive | free below a self-tuned threshold | grow until a free target is met |
//! | static | free below `FreeThreshold` | garbage above `GarbageThreshold` |
//! | compact | free or allocated past `AllocationThreshold` | bounded live, garbage above threshold |
//! | aggressive | always | every region with garbage |
//! | passive | never | every region with garbage |
//! | continuous | always | as static |

pub mod adaptive;
pub mod aggressive;
pub mod compact;
pub mod continuous;
pub mod passive;
pub mod policy;
pub mod static_heuristics;

pub use adaptive::AdaptiveHeuristics;
pub use aggressive::AggressiveHeuristics;
pub use compact::CompactHeuristics;
pub use continuous::ContinuousHeuristics;
pub use passive::PassiveHeuristics;
pub use policy::CollectorPolicy;
pub use static_heuristics::StaticHeuristics;

use crate::config::{GcConfig, HeuristicsMode};
use crate::heap::RegionState;
use std::time::Instant;

/// Heap numbers the start trigger looks at
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapSnapshot {
    /// Maximum heap capacity in bytes
    pub capacity: usize,
    /// Bytes the mutator view can still hand out
    pub available: usize,
    pub used: usize,
    pub bytes_allocated_since_gc_start: usize,
    pub region_bytes: usize,
}

/// Per-region input to collection-set selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionData {
    pub index: usize,
    pub state: RegionState,
    pub used_bytes: usize,
    pub live_bytes: usize,
}

impl RegionData {
    pub fn garbage_bytes(&self) -> usize {
        self.used_bytes.saturating_sub(self.live_bytes)
    }
}

/// Result of collection-set selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSetSelection {
    /// Regions to evacuate, in selection order
    pub cset: Vec<usize>,
    /// Regions with no live data, trashed right away
    pub immediate: Vec<usize>,
    pub immediate_garbage: usize,
    pub cset_garbage: usize,
    pub cset_live: usize,
}

/// Settings and counters shared by every mode
#[derive(Debug, Clone)]
pub struct HeuristicsBase {
    pub garbage_threshold: usize,
    pub free_threshold: usize,
    pub allocation_threshold: usize,
    pub immediate_threshold: usize,
    pub full_gc_threshold: usize,
    pub guaranteed_gc_interval_ms: u64,
    pub class_unloading: bool,
    pub class_unloading_with_concurrent_mark: bool,
    pub unload_classes_frequency: usize,
    pub region_bytes: usize,
    pub cycle_counter: u64,
    pub degenerated_cycles_in_a_row: usize,
    pub successful_cycles_in_a_row: usize,
    pub last_cycle_end: Instant,
}

impl HeuristicsBase {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            garbage_threshold: config.garbage_threshold,
            free_threshold: config.free_threshold,
            allocation_threshold: config.allocation_threshold,
            immediate_threshold: config.immediate_threshold,
            full_gc_threshold: config.full_gc_threshold,
            guaranteed_gc_interval_ms: config.guaranteed_gc_interval_ms,
            class_unloading: config.class_unloading,
            class_unloading_with_concurrent_mark: config.class_unloading_with_concurrent_mark,
            unload_classes_frequency: config.unload_classes_frequency,
            region_bytes: config.region_size_bytes(),
            cycle_counter: 0,
            degenerated_cycles_in_a_row: 0,
            successful_cycles_in_a_row: 0,
            last_cycle_end: Instant::now(),
        }
    }

    /// Garbage above which a region is worth evacuating
    pub fn region_garbage_threshold(&self) -> usize {
        self.region_bytes * self.garbage_threshold / 100
    }

    /// Guaranteed-interval trigger
    pub fn periodic_gc_due(&self) -> bool {
        self.guaranteed_gc_interval_ms > 0
            && self.last_cycle_end.elapsed().as_millis() as u64 > self.guaranteed_gc_interval_ms
    }

    /// May this cycle unload classes at all?
    pub fn can_unload_classes(&self) -> bool {
        self.class_unloading && self.class_unloading_with_concurrent_mark
    }

    /// Every `UnloadClassesFrequency`-th cycle unloads
    pub fn unload_on_frequency(&self) -> bool {
        self.can_unload_classes()
            && self.unload_classes_frequency != 0
            && (self.cycle_counter + 1) % self.unload_classes_frequency as u64 == 0
    }
}

/// Shared immediate-garbage pass and candidate ordering
///
/// Candidates are Regular regions with live data, sorted by garbage
/// descending and then by region index.
pub fn classify_regions(
    regions: &[RegionData],
) -> (Vec<RegionData>, Vec<usize>, usize) {
    let mut candidates = Vec::new();
    let mut immediate = Vec::new();
    let mut immediate_garbage = 0;

    let mut i = 0;
    while i < regions.len() {
        let r = regions[i];
        match r.state {
            RegionState::Regular if r.live_bytes == 0 => {
                immediate.push(r.index);
                immediate_garbage += r.used_bytes;
            }
            RegionState::Regular => candidates.push(r),
            RegionState::HumongousStart if r.live_bytes == 0 => {
                immediate.push(r.index);
                immediate_garbage += r.used_bytes;
                while i + 1 < regions.len() && regions[i + 1].state == RegionState::HumongousCont {
                    i += 1;
                    immediate.push(regions[i].index);
                    immediate_garbage += regions[i].used_bytes;
                }
            }
            _ => {}
        }
        i += 1;
    }

    candidates.sort_by(|a, b| {
        b.garbage_bytes()
            .cmp(&a.garbage_bytes())
            .then(a.index.cmp(&b.index))
    });
    (candidates, immediate, immediate_garbage)
}

/// Collector decision policy for one heuristics mode
pub trait Heuristics: Send {
    fn mode(&self) -> HeuristicsMode;

    fn base(&self) -> &HeuristicsBase;

    fn base_mut(&mut self) -> &mut HeuristicsBase;

    fn name(&self) -> &'static str {
        self.mode().name()
    }

    /// Should the control thread start a concurrent cycle now?
    fn should_start_normal_gc(&mut self, snapshot: &HeapSnapshot) -> bool;

    /// Pick cset regions from `candidates`, ordered by garbage descending
    fn choose_from_candidates(
        &self,
        candidates: &[RegionData],
        snapshot: &HeapSnapshot,
        actual_free: usize,
    ) -> Vec<usize>;

    /// Immediate garbage plus the mode's choice among candidates
    ///
    /// No collection set is chosen when immediate garbage already exceeds
    /// `ImmediateThreshold` percent of all garbage.
    fn choose_collection_set(
        &mut self,
        regions: &[RegionData],
        snapshot: &HeapSnapshot,
    ) -> CollectionSetSelection {
        let (candidates, immediate, immediate_garbage) = classify_regions(regions);
        let total_garbage: usize =
            immediate_garbage + candidates.iter().map(|r| r.garbage_bytes()).sum::<usize>();
        let immediate_percent = if total_garbage == 0 {
            0
        } else {
            immediate_garbage * 100 / total_garbage
        };

        let mut selection = CollectionSetSelection {
            immediate,
            immediate_garbage,
            ..Default::default()
        };

        if immediate_percent <= self.base().immediate_threshold {
            let actual_free = snapshot.available + immediate_garbage;
            selection.cset = self.choose_from_candidates(&candidates, snapshot, actual_free);
            for idx in &selection.cset {
                if let Some(r) = candidates.iter().find(|r| r.index == *idx) {
                    selection.cset_garbage += r.garbage_bytes();
                    selection.cset_live += r.live_bytes;
                }
            }
        }
        selection
    }

    /// Should an allocation failure run a degenerated cycle?
    fn should_degenerate_cycle(&self) -> bool {
        self.base().degenerated_cycles_in_a_row <= self.base().full_gc_threshold
    }

    /// Decide class unloading for the cycle about to start
    fn should_unload_classes(&mut self) -> bool {
        self.base().unload_on_frequency()
    }

    /// Can this mode run concurrent cycles?
    fn can_do_concurrent(&self) -> bool {
        true
    }

    fn record_cycle_start(&mut self) {
        self.base_mut().cycle_counter += 1;
    }

    fn record_cycle_end(&mut self) {
        self.base_mut().last_cycle_end = Instant::now();
    }

    fn record_success_concurrent(&mut self) {
        let base = self.base_mut();
        base.degenerated_cycles_in_a_row = 0;
        base.successful_cycles_in_a_row += 1;
    }

    fn record_success_degenerated(&mut self) {
        let base = self.base_mut();
        base.degenerated_cycles_in_a_row += 1;
        base.successful_cycles_in_a_row = 0;
    }

    fn record_success_full(&mut self) {
        let base = self.base_mut();
        base.degenerated_cycles_in_a_row = 0;
        base.successful_cycles_in_a_row += 1;
    }

    fn record_allocation_failure_gc(&mut self) {}

    fn record_explicit_gc(&mut self) {}

    fn record_peak_occupancy(&mut self, _used: usize) {}
}

/// Build the heuristics for `config.heuristics`
pub fn create(config: &GcConfig) -> Box<dyn Heuristics> {
    match config.heuristics {
        HeuristicsMode::Adaptive => Box::new(AdaptiveHeuristics::new(config)),
        HeuristicsMode::Static => Box::new(StaticHeuristics::new(config)),
        HeuristicsMode::Compact => Box::new(CompactHeuristics::new(config)),
        HeuristicsMode::Aggressive => Box::new(AggressiveHeuristics::new(config)),
        HeuristicsMode::Passive => Box::new(PassiveHeuristics::new(config)),
        HeuristicsMode::Continuous => Box::new(ContinuousHeuristics::new(config)),
    }
}

/// Adjust flags the user left at default to suit the mode
pub fn apply_ergonomics(config: &mut GcConfig) {
    fn set_default<T>(config: &mut GcConfig, flag: &str, value: T, apply: fn(&mut GcConfig, T)) {
        if !config.is_explicit(flag) {
            apply(config, value);
        }
    }

    match config.heuristics {
        HeuristicsMode::Static => {
            set_default(config, "ShenandoahImmediateThreshold", 1, |c, v| {
                c.immediate_threshold = v
            });
        }
        HeuristicsMode::Compact => {
            set_default(config, "ShenandoahAllocationThreshold", 10, |c, v| {
                c.allocation_threshold = v
            });
            set_default(config, "ShenandoahImmediateThreshold", 100, |c, v| {
                c.immediate_threshold = v
            });
            set_default(config, "ShenandoahUncommitDelay", 5000, |c, v| {
                c.uncommit_delay_ms = v
            });
            set_default(config, "ShenandoahGuaranteedGCInterval", 30_000, |c, v| {
                c.guaranteed_gc_interval_ms = v
            });
            set_default(config, "ShenandoahGarbageThreshold", 20, |c, v| {
                c.garbage_threshold = v
            });
            set_default(config, "ShenandoahUncommit", true, |c, v| c.uncommit = v);
        }
        HeuristicsMode::Aggressive => {
            set_default(config, "ShenandoahImmediateThreshold", 100, |c, v| {
                c.immediate_threshold = v
            });
            set_default(config, "ShenandoahPacing", false, |c, v| c.pacing = v);
            set_default(config, "ShenandoahEvacReserveOverflow", true, |c, v| {
                c.evac_reserve_overflow = v
            });
            if config.class_unloading {
                set_default(config, "ShenandoahUnloadClassesFrequency", 1, |c, v| {
                    c.unload_classes_frequency = v
                });
            }
        }
        HeuristicsMode::Passive => {
            set_default(config, "ShenandoahPacing", false, |c, v| c.pacing = v);
            set_default(config, "ShenandoahSATBBarrier", false, |c, v| c.barriers.satb = v);
            set_default(config, "ShenandoahWriteBarrier", false, |c, v| c.barriers.write = v);
            set_default(config, "ShenandoahReadBarrier", false, |c, v| c.barriers.read = v);
            set_default(config, "ShenandoahCASBarrier", false, |c, v| c.barriers.cas = v);
            set_default(config, "ShenandoahAcmpBarrier", false, |c, v| c.barriers.acmp = v);
            set_default(config, "ShenandoahCloneBarrier", false, |c, v| c.barriers.clone = v);
        }
        HeuristicsMode::Adaptive | HeuristicsMode::Continuous => {}
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub const REGION: usize = 1024 * 1024;

    pub fn config() -> GcConfig {
        GcConfig {
            max_heap_size: 100 * REGION,
            initial_heap_size: 100 * REGION,
            region_size: Some(REGION),
            ..Default::default()
        }
    }

    pub fn regular(index: usize, used: usize, live: usize) -> RegionData {
        RegionData {
            index,
            state: RegionState::Regular,
            used_bytes: used,
            live_bytes: live,
        }
    }

    pub fn snapshot(available: usize) -> HeapSnapshot {
        HeapSnapshot {
            capacity: 100 * REGION,
            available,
            used: 100 * REGION - available,
            bytes_allocated_since_gc_start: 0,
            region_bytes: REGION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_candidates_sorted_by_garbage_then_index() {
        let regions = [
            regular(0, REGION, REGION / 2),
            regular(1, REGION, REGION / 4),
            regular(2, REGION, REGION / 2),
        ];
        let (candidates, immediate, _) = classify_regions(&regions);
        let order: Vec<_> = candidates.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![1, 0, 2]);
        assert!(immediate.is_empty());
    }

    #[test]
    fn test_dead_humongous_trashed_with_continuations() {
        let regions = [
            RegionData {
                index: 4,
                state: RegionState::HumongousStart,
                used_bytes: REGION,
                live_bytes: 0,
            },
            RegionData {
                index: 5,
                state: RegionState::HumongousCont,
                used_bytes: REGION / 2,
                live_bytes: 0,
            },
            RegionData {
                index: 6,
                state: RegionState::PinnedHumongousStart,
                used_bytes: REGION,
                live_bytes: 0,
            },
            regular(7, REGION, 0),
        ];
        let (_, immediate, garbage) = classify_regions(&regions);
        assert_eq!(immediate, vec![4, 5, 7]);
        assert_eq!(garbage, REGION * 5 / 2);
    }

    #[test]
    fn test_immediate_threshold_blocks_cset() {
        let mut config = config();
        config.immediate_threshold = 50;
        let mut h = StaticHeuristics::new(&config);
        let regions = [regular(0, REGION, 0), regular(1, REGION, REGION / 10)];
        let sel = h.choose_collection_set(&regions, &snapshot(10 * REGION));
        assert_eq!(sel.immediate, vec![0]);
        assert!(sel.cset.is_empty(), "immediate garbage is 52% of all garbage");
    }

    #[test]
    fn test_unload_frequency() {
        let mut config = config();
        config.unload_classes_frequency = 3;
        let mut base = HeuristicsBase::new(&config);
        let decisions: Vec<bool> = (0..6)
            .map(|_| {
                base.cycle_counter += 1;
                base.unload_on_frequency()
            })
            .collect();
        assert_eq!(decisions, vec![false, true, false, false, true, false]);

        base.class_unloading_with_concurrent_mark = false;
        base.cycle_counter = 2;
        assert!(!base.unload_on_frequency());
    }

    #[test]
    fn test_ergonomics_respect_explicit_flags() {
        let mut config =
            GcConfig::from_vm_options(&["-XX:+UnlockExperimentalVMOptions", "-XX:ShenandoahGarbageThreshold=33", "-XX:ShenandoahGCHeuristics=compact"])
                .unwrap();
        apply_ergonomics(&mut config);
        assert_eq!(config.garbage_threshold, 33);
        assert_eq!(config.allocation_threshold, 10);
        assert!(config.uncommit);
    }

    #[test]
    fn test_passive_disables_implicit_barriers() {
        let mut config = GcConfig::from_vm_options(&[
            "-XX:+UnlockDiagnosticVMOptions",
            "-XX:ShenandoahGCHeuristics=passive",
            "-XX:+ShenandoahCASBarrier",
        ])
        .unwrap();
        apply_ergonomics(&mut config);
        assert!(!config.barriers.satb);
        assert!(config.barriers.cas);
        assert!(!config.pacing);
    }
}
