//! Free Set - Region Selection for Allocation
//!
//! The free set tracks which regions can serve allocations, split into two
//! views:
//!
//! ```text
//!   region:    0   1   2   3   4   5   6   7   8   9
//!   mutator:   x   x   .   x   x   x   .   .   .   .     <- scanned left to right
//!   collector: .   .   .   .   .   .   .   .   x   x     <- scanned right to left
//!                                                  ^^^
//!                                       evacuation reserve
//! ```
//!
//! Mutators fill from the left, the collector copies into the right. The
//! evacuation reserve keeps GC copies from failing while mutators exhaust
//! their view.
//!
//! The free set is always accessed under the heap lock (`Heap::lock`).
//! Region state changes made here are serialized by that lock.

use super::region::Region;
use super::Heap;
use crate::allocator::{AllocRequest, AllocType};

/// Free set views and accounting
pub struct FreeSet {
    mutator: Vec<bool>,
    collector: Vec<bool>,
    mutator_leftmost: usize,
    mutator_rightmost: usize,
    collector_leftmost: usize,
    collector_rightmost: usize,
    /// Bytes the mutator view could hand out at rebuild time
    capacity: usize,
    /// Bytes handed to mutators (and wasted in mutator regions) since rebuild
    used: usize,
}

impl FreeSet {
    pub fn new(region_count: usize) -> Self {
        Self {
            mutator: vec![false; region_count],
            collector: vec![false; region_count],
            mutator_leftmost: region_count,
            mutator_rightmost: 0,
            collector_leftmost: region_count,
            collector_rightmost: 0,
            capacity: 0,
            used: 0,
        }
    }

    fn max(&self) -> usize {
        self.mutator.len()
    }

    pub fn clear(&mut self) {
        let max = self.max();
        self.mutator.iter_mut().for_each(|b| *b = false);
        self.collector.iter_mut().for_each(|b| *b = false);
        self.mutator_leftmost = max;
        self.mutator_rightmost = 0;
        self.collector_leftmost = max;
        self.collector_rightmost = 0;
        self.capacity = 0;
        self.used = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes still available to mutators
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }

    pub fn is_mutator_free(&self, idx: usize) -> bool {
        self.mutator.get(idx).copied().unwrap_or(false)
    }

    pub fn is_collector_free(&self, idx: usize) -> bool {
        self.collector.get(idx).copied().unwrap_or(false)
    }

    pub fn mutator_count(&self) -> usize {
        self.mutator.iter().filter(|b| **b).count()
    }

    pub fn collector_count(&self) -> usize {
        self.collector.iter().filter(|b| **b).count()
    }

    fn mutator_range(&self) -> std::ops::Range<usize> {
        if self.mutator_leftmost > self.mutator_rightmost {
            0..0
        } else {
            self.mutator_leftmost..self.mutator_rightmost + 1
        }
    }

    fn collector_range(&self) -> std::ops::Range<usize> {
        if self.collector_leftmost > self.collector_rightmost {
            0..0
        } else {
            self.collector_leftmost..self.collector_rightmost + 1
        }
    }

    fn alloc_capacity(heap: &Heap, r: &Region) -> usize {
        if r.is_trash() {
            heap.region_words()
        } else {
            r.free_words()
        }
    }

    fn is_empty_or_trash(r: &Region) -> bool {
        r.is_empty() || r.is_trash()
    }

    // === Allocation ===

    /// Serve an allocation request
    ///
    /// Requests above the humongous threshold take the contiguous path,
    /// which only mutators use. Returns the start address and sets
    /// `req.actual_size()`.
    pub fn allocate(&mut self, heap: &Heap, req: &mut AllocRequest) -> Option<usize> {
        if req.size() > heap.humongous_threshold_words() {
            return match req.kind() {
                AllocType::Shared => self.allocate_contiguous(heap, req),
                _ => None,
            };
        }
        self.allocate_single(heap, req)
    }

    fn allocate_single(&mut self, heap: &Heap, req: &mut AllocRequest) -> Option<usize> {
        let params = heap.params();
        if req.is_mutator_alloc() {
            for idx in self.mutator_range() {
                if self.mutator[idx] {
                    if let Some(addr) = self.try_allocate_in(heap, idx, req) {
                        return Some(addr);
                    }
                }
            }

            // Mutator view is exhausted. Take empty regions from the collector.
            for idx in self.collector_range() {
                if self.collector[idx] && Self::is_empty_or_trash(heap.region(idx)) {
                    self.flip_to_mutator(heap, idx);
                    if let Some(addr) = self.try_allocate_in(heap, idx, req) {
                        return Some(addr);
                    }
                }
            }

            if params.allow_mixed_allocs {
                for idx in self.collector_range() {
                    if self.collector[idx] {
                        if let Some(addr) = self.try_allocate_in(heap, idx, req) {
                            return Some(addr);
                        }
                    }
                }
            }
            None
        } else {
            for idx in self.collector_range().rev() {
                if self.collector[idx] {
                    if let Some(addr) = self.try_allocate_in(heap, idx, req) {
                        return Some(addr);
                    }
                }
            }

            if !params.evac_reserve_overflow {
                return None;
            }

            for idx in self.mutator_range().rev() {
                if self.mutator[idx] && Self::is_empty_or_trash(heap.region(idx)) {
                    self.flip_to_gc(heap, idx);
                    if let Some(addr) = self.try_allocate_in(heap, idx, req) {
                        return Some(addr);
                    }
                }
            }

            if params.allow_mixed_allocs {
                for idx in self.mutator_range().rev() {
                    if self.mutator[idx] {
                        if let Some(addr) = self.try_allocate_in(heap, idx, req) {
                            return Some(addr);
                        }
                    }
                }
            }
            None
        }
    }

    fn try_allocate_in(&mut self, heap: &Heap, idx: usize, req: &mut AllocRequest) -> Option<usize> {
        let r = heap.region(idx);
        if r.is_trash() && heap.recycle_region(r).is_err() {
            return None;
        }
        if !r.is_alloc_allowed() {
            self.retire(idx, 0);
            return None;
        }
        let was_committed = r.is_committed();
        if r.make_regular_allocation().is_err() {
            return None;
        }
        if !was_committed {
            heap.note_committed(r);
        }

        let seq = heap.next_alloc_seqnum();
        let kind = req.kind().region_kind();
        let result = if req.is_lab_alloc() {
            let mut size = req.size();
            let free = r.free_words();
            if size > free && heap.params().elastic_tlab {
                size = free;
            }
            if size >= req.min_size() {
                r.allocate(size, kind, seq).map(|addr| {
                    req.set_actual_size(size);
                    addr
                })
            } else {
                None
            }
        } else {
            let size = req.size();
            r.allocate(size, kind, seq).map(|addr| {
                req.set_actual_size(size);
                addr
            })
        };

        if result.is_some() {
            let bytes = req.actual_size() * 8;
            heap.increase_used(bytes);
            if req.is_mutator_alloc() {
                self.used += bytes;
                heap.increase_allocated(bytes);
            }
        }

        if result.is_none() || r.free_words() < heap.min_lab_words() {
            // Region is full or cannot hold even the smallest LAB; count the
            // tail as used and drop it from both views.
            self.retire(idx, r.free_words());
        }
        result
    }

    fn retire(&mut self, idx: usize, waste_words: usize) {
        if self.mutator[idx] {
            self.used += waste_words * 8;
        }
        self.mutator[idx] = false;
        self.collector[idx] = false;
        self.adjust_bounds();
    }

    /// Allocate a humongous object in contiguous empty regions
    fn allocate_contiguous(&mut self, heap: &Heap, req: &mut AllocRequest) -> Option<usize> {
        let words = req.size();
        let region_words = heap.region_words();
        let num = (words + region_words - 1) / region_words;
        if num > self.max() {
            return None;
        }

        let range = self.mutator_range();
        let mut beg = range.start;
        let mut end = beg;
        loop {
            if end >= range.end {
                return None;
            }
            if !self.mutator[end] || !Self::is_empty_or_trash(heap.region(end)) {
                end += 1;
                beg = end;
                continue;
            }
            if end - beg + 1 == num {
                break;
            }
            end += 1;
        }

        let remainder = words % region_words;
        for idx in beg..=end {
            let r = heap.region(idx);
            if r.is_trash() && heap.recycle_region(r).is_err() {
                return None;
            }
            let was_committed = r.is_committed();
            let made = if idx == beg {
                r.make_humongous_start()
            } else {
                r.make_humongous_cont()
            };
            if made.is_err() {
                return None;
            }
            if !was_committed {
                heap.note_committed(r);
            }
            let used_words = if idx == end && remainder != 0 {
                remainder
            } else {
                region_words
            };
            r.set_top(r.bottom() + used_words);
            self.mutator[idx] = false;
        }
        self.adjust_bounds();

        self.used += num * region_words * 8;
        heap.increase_used(words * 8);
        heap.increase_allocated(words * 8);
        req.set_actual_size(words);
        Some(heap.region(beg).bottom())
    }

    // === View maintenance ===

    fn flip_to_mutator(&mut self, heap: &Heap, idx: usize) {
        self.collector[idx] = false;
        self.mutator[idx] = true;
        self.capacity += Self::alloc_capacity(heap, heap.region(idx)) * 8;
        self.adjust_bounds();
    }

    fn flip_to_gc(&mut self, heap: &Heap, idx: usize) {
        self.mutator[idx] = false;
        self.collector[idx] = true;
        self.capacity = self
            .capacity
            .saturating_sub(Self::alloc_capacity(heap, heap.region(idx)) * 8);
        self.adjust_bounds();
    }

    fn adjust_bounds(&mut self) {
        let max = self.max();
        while self.mutator_leftmost < max && !self.mutator[self.mutator_leftmost] {
            self.mutator_leftmost += 1;
        }
        while self.mutator_rightmost > 0 && !self.mutator[self.mutator_rightmost] {
            self.mutator_rightmost -= 1;
        }
        while self.collector_leftmost < max && !self.collector[self.collector_leftmost] {
            self.collector_leftmost += 1;
        }
        while self.collector_rightmost > 0 && !self.collector[self.collector_rightmost] {
            self.collector_rightmost -= 1;
        }
        if self.mutator_leftmost >= max {
            self.mutator_rightmost = 0;
        }
        if self.collector_leftmost >= max {
            self.collector_rightmost = 0;
        }
    }

    fn recompute_bounds(&mut self) {
        let max = self.max();
        self.mutator_leftmost = self.mutator.iter().position(|b| *b).unwrap_or(max);
        self.mutator_rightmost = self.mutator.iter().rposition(|b| *b).unwrap_or(0);
        self.collector_leftmost = self.collector.iter().position(|b| *b).unwrap_or(max);
        self.collector_rightmost = self.collector.iter().rposition(|b| *b).unwrap_or(0);
    }

    /// Rebuild both views from region states
    ///
    /// 1. Every allocatable or trash region with free space joins the mutator view
    /// 2. `EvacReserve`% of the heap moves from the rightmost empty regions
    ///    into the collector view
    pub fn rebuild(&mut self, heap: &Heap) {
        self.clear();

        for r in heap.regions() {
            if r.is_alloc_allowed() || r.is_trash() {
                let cap = Self::alloc_capacity(heap, r);
                if cap > 0 {
                    self.capacity += cap * 8;
                    self.mutator[r.index()] = true;
                }
            }
        }

        let to_reserve = heap.max_capacity() * heap.params().evac_reserve / 100;
        let mut reserved = 0;
        for idx in (0..self.max()).rev() {
            if reserved >= to_reserve {
                break;
            }
            let r = heap.region(idx);
            if self.mutator[idx] && Self::is_empty_or_trash(r) {
                self.mutator[idx] = false;
                self.collector[idx] = true;
                let cap = Self::alloc_capacity(heap, r) * 8;
                self.capacity = self.capacity.saturating_sub(cap);
                reserved += cap;
            }
        }

        self.recompute_bounds();
        log::debug!(
            target: "sgc",
            "Free set rebuilt: mutator {} regions ({}K available), collector {} regions ({}K reserved)",
            self.mutator_count(),
            self.available() / 1024,
            self.collector_count(),
            reserved / 1024
        );
    }

    /// Recycle every trash region in the heap
    pub fn recycle_trash(&mut self, heap: &Heap) -> usize {
        let mut count = 0;
        for r in heap.regions() {
            if r.is_trash() && heap.recycle_region(r).is_ok() {
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GcConfig, KB};
    use crate::heap::Heap;

    fn heap(regions: usize) -> Heap {
        let config = GcConfig {
            max_heap_size: regions * 64 * KB,
            initial_heap_size: regions * 64 * KB,
            region_size: Some(64 * KB),
            min_tlab_size: KB,
            ..Default::default()
        };
        Heap::new(&config).unwrap()
    }

    #[test]
    fn test_rebuild_reserves_rightmost() {
        let heap = heap(40);
        let fs = heap.lock();
        // 5% of 40 regions = 2 regions
        assert!(fs.is_collector_free(39));
        assert!(fs.is_collector_free(38));
        assert!(!fs.is_collector_free(37));
        assert_eq!(fs.mutator_count(), 38);
        assert_eq!(fs.available(), 38 * 64 * KB);
    }

    #[test]
    fn test_mutator_fills_left_collector_fills_right() {
        let heap = heap(40);
        let mut fs = heap.lock();

        let mut req = AllocRequest::for_shared(16);
        let m = fs.allocate(&heap, &mut req).unwrap();
        assert_eq!(heap.region_index_of_addr(m), 0);

        let mut req = AllocRequest::for_shared_gc(16);
        let g = fs.allocate(&heap, &mut req).unwrap();
        assert_eq!(heap.region_index_of_addr(g), 39);
        assert_eq!(fs.used(), 16 * 8, "collector allocations are not mutator used");
    }

    #[test]
    fn test_elastic_lab_shrinks_to_tail() {
        let heap = heap(40);
        let mut fs = heap.lock();
        let region_words = heap.region_words();

        let mut req = AllocRequest::for_shared(region_words - 200);
        fs.allocate(&heap, &mut req).unwrap();

        let mut lab = AllocRequest::for_tlab(128, 1024);
        let addr = fs.allocate(&heap, &mut lab).unwrap();
        assert_eq!(heap.region_index_of_addr(addr), 0);
        assert_eq!(lab.actual_size(), 200);
        assert!(!fs.is_mutator_free(0), "full region leaves the view");
    }

    #[test]
    fn test_humongous_takes_contiguous_run() {
        let heap = heap(40);
        let mut fs = heap.lock();
        let region_words = heap.region_words();

        let mut req = AllocRequest::for_shared(region_words * 2 + 10);
        let addr = fs.allocate(&heap, &mut req).unwrap();
        assert_eq!(addr, heap.region(0).bottom());
        assert!(heap.region(0).is_humongous_start());
        assert!(heap.region(1).is_humongous_continuation());
        assert!(heap.region(2).is_humongous_continuation());
        assert_eq!(heap.region(2).used_words(), 10);
        assert!(!fs.is_mutator_free(2));
    }

    #[test]
    fn test_gc_overflow_steals_from_mutator() {
        let heap = heap(40);
        let mut fs = heap.lock();
        let region_words = heap.region_words();

        for _ in 0..2 {
            let mut req = AllocRequest::for_shared_gc(region_words);
            fs.allocate(&heap, &mut req).unwrap();
        }
        assert_eq!(fs.collector_count(), 0);

        let mut req = AllocRequest::for_shared_gc(16);
        let addr = fs.allocate(&heap, &mut req).unwrap();
        assert_eq!(heap.region_index_of_addr(addr), 37);
        assert!(fs.is_collector_free(37));
    }
}
