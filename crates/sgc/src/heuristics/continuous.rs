//! Continuous heuristics: back-to-back cycles with the static cset policy

use super::static_heuristics::choose_by_garbage_threshold;
use super::{HeapSnapshot, Heuristics, HeuristicsBase, RegionData};
use crate::config::{GcConfig, HeuristicsMode};

pub struct ContinuousHeuristics {
    base: HeuristicsBase,
}

impl ContinuousHeuristics {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            base: HeuristicsBase::new(config),
        }
    }
}

impl Heuristics for ContinuousHeuristics {
    fn mode(&self) -> HeuristicsMode {
        HeuristicsMode::Continuous
    }

    fn base(&self) -> &HeuristicsBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HeuristicsBase {
        &mut self.base
    }

    fn should_start_normal_gc(&mut self, _snapshot: &HeapSnapshot) -> bool {
        true
    }

    fn choose_from_candidates(
        &self,
        candidates: &[RegionData],
        _snapshot: &HeapSnapshot,
        _actual_free: usize,
    ) -> Vec<usize> {
        choose_by_garbage_threshold(&self.base, candidates)
    }
}
