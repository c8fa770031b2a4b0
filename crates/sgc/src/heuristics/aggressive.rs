//! Aggressive heuristics: back-to-back cycles that evacuate everything
//!
//! A stress mode. Every region with any garbage joins the collection set,
//! and whether a cycle unloads classes is a coin flip from a seeded RNG so
//! runs are reproducible.

use super::{HeapSnapshot, Heuristics, HeuristicsBase, RegionData};
use crate::config::{GcConfig, HeuristicsMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct AggressiveHeuristics {
    base: HeuristicsBase,
    rng: StdRng,
}

impl AggressiveHeuristics {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            base: HeuristicsBase::new(config),
            rng: StdRng::seed_from_u64(config.random_seed),
        }
    }
}

impl Heuristics for AggressiveHeuristics {
    fn mode(&self) -> HeuristicsMode {
        HeuristicsMode::Aggressive
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
        candidates
            .iter()
            .filter(|r| r.garbage_bytes() > 0)
            .map(|r| r.index)
            .collect()
    }

    fn should_unload_classes(&mut self) -> bool {
        if !self.base.can_unload_classes() || self.base.unload_classes_frequency == 0 {
            return false;
        }
        self.rng.gen_bool(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_takes_every_region_with_garbage() {
        let mut h = AggressiveHeuristics::new(&config());
        let regions = [
            regular(0, REGION, REGION),
            regular(1, REGION, REGION - 8),
            regular(2, REGION, 1),
        ];
        let sel = h.choose_collection_set(&regions, &snapshot(50 * REGION));
        assert_eq!(sel.cset, vec![2, 1]);
    }

    #[test]
    fn test_unloading_is_seeded() {
        let decide = || {
            let mut h = AggressiveHeuristics::new(&config());
            (0..32).map(|_| h.should_unload_classes()).collect::<Vec<_>>()
        };
        let first = decide();
        assert_eq!(first, decide());
        assert!(first.iter().any(|d| *d) && first.iter().any(|d| !*d));
    }
}
