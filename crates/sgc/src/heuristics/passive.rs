//! Passive heuristics: stop-the-world collections only
//!
//! Never starts a concurrent cycle and never degenerates; every allocation
//! failure goes straight to Full GC.

use super::{HeapSnapshot, Heuristics, HeuristicsBase, RegionData};
use crate::config::{GcConfig, HeuristicsMode};

pub struct PassiveHeuristics {
    base: HeuristicsBase,
}

impl PassiveHeuristics {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            base: HeuristicsBase::new(config),
        }
    }
}

impl Heuristics for PassiveHeuristics {
    fn mode(&self) -> HeuristicsMode {
        HeuristicsMode::Passive
    }

    fn base(&self) -> &HeuristicsBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HeuristicsBase {
        &mut self.base
    }

    fn should_start_normal_gc(&mut self, _snapshot: &HeapSnapshot) -> bool {
        false
    }

    fn choose_from_candidates(
        &self,
        candidates: &[RegionData],
        _snapshot: &HeapSnapshot,
        _actual_free: usize,
    ) -> Vec<usize> {
        candidates
            .iter()
            .filter(|r| r.garbage_bytes() > 0)
            .map(|r| r.index)
            .collect()
    }

    fn should_degenerate_cycle(&self) -> bool {
        false
    }

    fn should_unload_classes(&mut self) -> bool {
        self.base.class_unloading && self.base.unload_classes_frequency != 0
    }

    fn can_do_concurrent(&self) -> bool {
        false
    }
}
