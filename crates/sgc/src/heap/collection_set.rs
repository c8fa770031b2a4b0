//! Collection Set - Regions Selected for Evacuation
//!
//! Chosen at final mark and immutable until final update refs clears it.
//! Membership is a per-region flag array so barriers can test it without
//! a lock. Workers claim regions through a shared cursor.

use super::region::Region;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct CollectionSet {
    in_cset: Box<[AtomicBool]>,
    regions: RwLock<Vec<usize>>,
    garbage: AtomicUsize,
    live: AtomicUsize,
    cursor: AtomicUsize,
}

impl CollectionSet {
    pub fn new(region_count: usize) -> Self {
        Self {
            in_cset: (0..region_count).map(|_| AtomicBool::new(false)).collect(),
            regions: RwLock::new(Vec::new()),
            garbage: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Record a region; the caller moves it to the CSet state
    pub fn add_region(&self, r: &Region) {
        if self.in_cset[r.index()].swap(true, Ordering::AcqRel) {
            return;
        }
        self.regions.write().push(r.index());
        self.garbage.fetch_add(r.garbage_words() * 8, Ordering::Relaxed);
        self.live.fetch_add(r.live_words() * 8, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_in(&self, idx: usize) -> bool {
        self.in_cset
            .get(idx)
            .map_or(false, |b| b.load(Ordering::Acquire))
    }

    pub fn clear(&self) {
        let mut regions = self.regions.write();
        for idx in regions.drain(..) {
            self.in_cset[idx].store(false, Ordering::Release);
        }
        self.garbage.store(0, Ordering::Relaxed);
        self.live.store(0, Ordering::Relaxed);
        self.cursor.store(0, Ordering::Relaxed);
    }

    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }

    pub fn count(&self) -> usize {
        self.regions.read().len()
    }

    /// Garbage bytes in the selected regions
    pub fn garbage(&self) -> usize {
        self.garbage.load(Ordering::Relaxed)
    }

    /// Live bytes that evacuation has to copy
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn region_indices(&self) -> Vec<usize> {
        self.regions.read().clone()
    }

    /// Claim the next unprocessed region, in selection order
    pub fn claim_next(&self) -> Option<usize> {
        let regions = self.regions.read();
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        regions.get(slot).copied()
    }

    /// Restart claiming from the first region
    pub fn clear_current_index(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_claim_clear() {
        let cset = CollectionSet::new(8);
        let a = Region::new(2, 2 * 64, 64, true);
        let b = Region::new(5, 5 * 64, 64, true);
        a.set_top(a.bottom() + 40);
        a.set_live_words(10);

        cset.add_region(&a);
        cset.add_region(&b);
        cset.add_region(&a);
        assert_eq!(cset.count(), 2);
        assert_eq!(cset.garbage(), 30 * 8);
        assert!(cset.is_in(2) && cset.is_in(5) && !cset.is_in(3));

        assert_eq!(cset.claim_next(), Some(2));
        assert_eq!(cset.claim_next(), Some(5));
        assert_eq!(cset.claim_next(), None);
        cset.clear_current_index();
        assert_eq!(cset.claim_next(), Some(2));

        cset.clear();
        assert!(cset.is_empty() && !cset.is_in(2));
    }
}
