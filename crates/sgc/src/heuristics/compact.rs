//! Compact heuristics: footprint first
//!
//! Starts cycles early and often, evacuates sparse regions aggressively and
//! uncommits empty regions quickly (see the ergonomics in the parent module).

use super::{HeapSnapshot, Heuristics, HeuristicsBase, RegionData};
use crate::config::{GcConfig, HeuristicsMode};

pub struct CompactHeuristics {
    base: HeuristicsBase,
}

impl CompactHeuristics {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            base: HeuristicsBase::new(config),
        }
    }
}

impl Heuristics for CompactHeuristics {
    fn mode(&self) -> HeuristicsMode {
        HeuristicsMode::Compact
    }

    fn base(&self) -> &HeuristicsBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HeuristicsBase {
        &mut self.base
    }

    fn should_start_normal_gc(&mut self, snapshot: &HeapSnapshot) -> bool {
        let threshold = snapshot.capacity * self.base.allocation_threshold / 100;
        if snapshot.available < threshold {
            log::info!(
                target: "sgc",
                "Trigger: Free ({}M) is lower than allocated recently ({}M)",
                snapshot.available / (1024 * 1024),
                threshold / (1024 * 1024)
            );
            return true;
        }
        if snapshot.bytes_allocated_since_gc_start > threshold {
            log::info!(
                target: "sgc",
                "Trigger: Allocated since last cycle ({}M) is larger than allocation threshold ({}M)",
                snapshot.bytes_allocated_since_gc_start / (1024 * 1024),
                threshold / (1024 * 1024)
            );
            return true;
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

    fn choose_from_candidates(
        &self,
        candidates: &[RegionData],
        _snapshot: &HeapSnapshot,
        actual_free: usize,
    ) -> Vec<usize> {
        let max_cset = actual_free * 3 / 4;
        let threshold = self.base.region_garbage_threshold();

        let mut cset = Vec::new();
        let mut live = 0;
        for r in candidates {
            let new_live = live + r.live_bytes;
            if new_live < max_cset && r.garbage_bytes() > threshold {
                cset.push(r.index);
                live = new_live;
            }
        }
        cset
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::heuristics::apply_ergonomics;

    fn compact_config() -> GcConfig {
        let mut config = config();
        config.heuristics = HeuristicsMode::Compact;
        apply_ergonomics(&mut config);
        config
    }

    #[test]
    fn test_triggers_on_allocation() {
        let mut h = CompactHeuristics::new(&compact_config());
        let mut snap = snapshot(50 * REGION);
        assert!(!h.should_start_normal_gc(&snap));
        snap.bytes_allocated_since_gc_start = 11 * REGION;
        assert!(h.should_start_normal_gc(&snap));
        assert!(h.should_start_normal_gc(&snapshot(9 * REGION)));
    }

    #[test]
    fn test_sparse_regions_chosen() {
        let mut h = CompactHeuristics::new(&compact_config());
        let regions = [
            regular(0, REGION, REGION * 9 / 10),
            regular(1, REGION, REGION / 2),
            regular(2, REGION, REGION / 4),
        ];
        let sel = h.choose_collection_set(&regions, &snapshot(40 * REGION));
        assert_eq!(sel.cset, vec![2, 1]);
    }
}
