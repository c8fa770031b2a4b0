//! Static heuristics: fixed free and garbage thresholds

use super::{HeapSnapshot, Heuristics, HeuristicsBase, RegionData};
use crate::config::{GcConfig, HeuristicsMode};

pub struct StaticHeuristics {
    base: HeuristicsBase,
}

impl StaticHeuristics {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            base: HeuristicsBase::new(config),
        }
    }
}

/// Regions whose garbage exceeds the per-region threshold
pub(crate) fn choose_by_garbage_threshold(
    base: &HeuristicsBase,
    candidates: &[RegionData],
) -> Vec<usize> {
    let threshold = base.region_garbage_threshold();
    candidates
        .iter()
        .filter(|r| r.garbage_bytes() > threshold)
        .map(|r| r.index)
        .collect()
}

impl Heuristics for StaticHeuristics {
    fn mode(&self) -> HeuristicsMode {
        HeuristicsMode::Static
    }

    fn base(&self) -> &HeuristicsBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HeuristicsBase {
        &mut self.base
    }

    fn should_start_normal_gc(&mut self, snapshot: &HeapSnapshot) -> bool {
        let threshold_available = snapshot.capacity * self.base.free_threshold / 100;
        let threshold_allocated = snapshot.capacity * self.base.allocation_threshold / 100;

        if snapshot.available < threshold_available
            && snapshot.bytes_allocated_since_gc_start > threshold_allocated
        {
            log::info!(
                target: "sgc",
                "Trigger: Free ({}M) is below free threshold ({}M)",
                snapshot.available / (1024 * 1024),
                threshold_available / (1024 * 1024)
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
        _actual_free: usize,
    ) -> Vec<usize> {
        choose_by_garbage_threshold(&self.base, candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_trigger_needs_low_free_and_allocation() {
        let mut h = StaticHeuristics::new(&config());
        let mut snap = snapshot(5 * REGION);
        assert!(!h.should_start_normal_gc(&snap), "nothing allocated yet");
        snap.bytes_allocated_since_gc_start = REGION;
        assert!(h.should_start_normal_gc(&snap));
        assert!(!h.should_start_normal_gc(&snapshot(50 * REGION)));
    }

    #[test]
    fn test_cset_over_garbage_threshold() {
        let mut h = StaticHeuristics::new(&config());
        let regions = [
            regular(0, REGION, REGION / 2),
            regular(1, REGION, REGION / 10),
            regular(2, REGION / 2, REGION / 4),
        ];
        let sel = h.choose_collection_set(&regions, &snapshot(10 * REGION));
        assert_eq!(sel.cset, vec![1]);
        assert_eq!(sel.cset_live, REGION / 10);
    }
}
