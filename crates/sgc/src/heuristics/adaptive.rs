//! Adaptive heuristics: a free threshold tuned by cycle outcomes
//!
//! The trigger threshold starts at `InitFreeThreshold` and moves within
//! `[MinFreeThreshold, MaxFreeThreshold]`:
//! - after more than `HappyCyclesThreshold` successful cycles in a row it
//!   steps down, starting cycles later;
//! - a degenerated cycle raises it by 10, a Full GC by 20.

use super::{HeapSnapshot, Heuristics, HeuristicsBase, RegionData};
use crate::config::{GcConfig, HeuristicsMode};

const FREE_THRESHOLD_STEP: isize = 5;
const DEGENERATE_PENALTY: isize = 10;
const FULL_PENALTY: isize = 20;

pub struct AdaptiveHeuristics {
    base: HeuristicsBase,
    free_threshold: usize,
    min_free_threshold: usize,
    max_free_threshold: usize,
    happy_cycles_threshold: usize,
    peak_occupancy: usize,
}

impl AdaptiveHeuristics {
    pub fn new(config: &GcConfig) -> Self {
        let min = config.min_free_threshold;
        let max = config.max_free_threshold;
        Self {
            base: HeuristicsBase::new(config),
            free_threshold: config.init_free_threshold.clamp(min, max),
            min_free_threshold: min,
            max_free_threshold: max,
            happy_cycles_threshold: config.happy_cycles_threshold,
            peak_occupancy: 0,
        }
    }

    pub fn free_threshold(&self) -> usize {
        self.free_threshold
    }

    pub fn peak_occupancy(&self) -> usize {
        self.peak_occupancy
    }

    fn adjust_free_threshold(&mut self, delta: isize) {
        let new = (self.free_threshold as isize + delta).clamp(
            self.min_free_threshold as isize,
            self.max_free_threshold as isize,
        ) as usize;
        if new != self.free_threshold {
            log::info!(
                target: "sgc",
                "Adjusting free threshold to: {}% ({}%)",
                new,
                delta
            );
            self.free_threshold = new;
        }
        self.base.successful_cycles_in_a_row = 0;
    }
}

impl Heuristics for AdaptiveHeuristics {
    fn mode(&self) -> HeuristicsMode {
        HeuristicsMode::Adaptive
    }

    fn base(&self) -> &HeuristicsBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HeuristicsBase {
        &mut self.base
    }

    fn should_start_normal_gc(&mut self, snapshot: &HeapSnapshot) -> bool {
        let threshold_available = snapshot.capacity * self.free_threshold / 100;
        if snapshot.available < threshold_available {
            log::info!(
                target: "sgc",
                "Trigger: Free ({}M) is below free threshold ({}M, {}%)",
                snapshot.available / (1024 * 1024),
                threshold_available / (1024 * 1024),
                self.free_threshold
            );
            return true;
        }

        if self.base.allocation_threshold > 0 {
            let threshold_allocated = snapshot.capacity * self.base.allocation_threshold / 100;
            if snapshot.bytes_allocated_since_gc_start > threshold_allocated {
                log::info!(
                    target: "sgc",
                    "Trigger: Allocated since last cycle ({}M) is larger than allocation threshold ({}M)",
                    snapshot.bytes_allocated_since_gc_start / (1024 * 1024),
                    threshold_allocated / (1024 * 1024)
                );
                return true;
            }
        }

        if self.base.periodic_gc_due() {
            log::info!(
                target: "sgc",
                "Trigger: Time since last GC is larger than guaranteed interval ({} ms)",
                self.base.guaranteed_gc_interval_ms
            );
            return true;
        }
        false
    }

    /// Grow the cset until the free target is met, within 3/4 of free space
    fn choose_from_candidates(
        &self,
        candidates: &[RegionData],
        snapshot: &HeapSnapshot,
        actual_free: usize,
    ) -> Vec<usize> {
        let free_target = (self.free_threshold + FREE_THRESHOLD_STEP as usize).min(100)
            * snapshot.capacity
            / 100;
        let min_garbage = free_target.saturating_sub(actual_free);
        let max_cset = actual_free * 3 / 4;
        let garbage_threshold = self.base.region_garbage_threshold();

        let mut cset = Vec::new();
        let mut live = 0;
        let mut garbage = 0;
        for r in candidates {
            let new_live = live + r.live_bytes;
            if new_live > max_cset {
                break;
            }
            if garbage < min_garbage || r.garbage_bytes() > garbage_threshold {
                cset.push(r.index);
                live = new_live;
                garbage += r.garbage_bytes();
            }
        }
        cset
    }

    fn record_success_concurrent(&mut self) {
        self.base.degenerated_cycles_in_a_row = 0;
        self.base.successful_cycles_in_a_row += 1;
        if self.base.successful_cycles_in_a_row > self.happy_cycles_threshold {
            self.adjust_free_threshold(-FREE_THRESHOLD_STEP);
        }
    }

    fn record_success_degenerated(&mut self) {
        self.base.degenerated_cycles_in_a_row += 1;
        self.adjust_free_threshold(DEGENERATE_PENALTY);
    }

    fn record_success_full(&mut self) {
        self.base.degenerated_cycles_in_a_row = 0;
        self.adjust_free_threshold(FULL_PENALTY);
    }

    fn record_explicit_gc(&mut self) {
        self.adjust_free_threshold(0);
    }

    fn record_peak_occupancy(&mut self, used: usize) {
        self.peak_occupancy = self.peak_occupancy.max(used);
    }
}
