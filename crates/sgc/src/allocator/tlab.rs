//! LAB - Local Allocation Buffer
//!
//! A LAB is a private `[start, end)` slice of a region carved out by one
//! free-set request. The owning thread bump allocates from it with no
//! synchronization. Mutators own a TLAB and a GCLAB (write barriers copy
//! objects too), GC workers own a GCLAB for the duration of a phase.
//!
//! ## Sizing
//!
//! Each refill doubles the desired size, starting at `MinTLABSize` and
//! capped at the maximum LAB size. Elastic LABs may come back smaller when
//! the free set shrinks the request to fit a region tail.
//!
//! ## Retirement
//!
//! Every pause retires all LABs. The unused tail is overwritten with a
//! filler so regions stay parseable from bottom to top.

use super::{AllocRequest, AllocType};
use crate::heap::Heap;

/// Local allocation buffer
#[derive(Debug)]
pub struct Lab {
    kind: AllocType,
    start: usize,
    top: usize,
    end: usize,
    desired_words: usize,
    refills: usize,
    wasted_words: usize,
}

impl Lab {
    /// Create an empty LAB; the first allocation triggers a refill
    pub fn new(kind: AllocType) -> Self {
        debug_assert!(kind.is_lab());
        Self {
            kind,
            start: 0,
            top: 0,
            end: 0,
            desired_words: 0,
            refills: 0,
            wasted_words: 0,
        }
    }

    pub fn kind(&self) -> AllocType {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.end > self.start
    }

    pub fn remaining(&self) -> usize {
        self.end - self.top
    }

    pub fn refills(&self) -> usize {
        self.refills
    }

    pub fn wasted_words(&self) -> usize {
        self.wasted_words
    }

    /// Does `addr` fall inside the current buffer?
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Bump allocate from the current buffer
    #[inline]
    pub fn allocate(&mut self, words: usize) -> Option<usize> {
        if words <= self.end - self.top {
            let addr = self.top;
            self.top += words;
            Some(addr)
        } else {
            None
        }
    }

    /// Roll back the most recent allocation
    ///
    /// Returns false if `addr` was not the last object carved from the LAB.
    pub fn undo_allocation(&mut self, addr: usize, words: usize) -> bool {
        if self.is_active() && addr + words == self.top && addr >= self.start {
            self.top = addr;
            true
        } else {
            false
        }
    }

    /// Fill the tail and detach from the region
    pub fn retire(&mut self, heap: &Heap) {
        if self.is_active() {
            let tail = self.end - self.top;
            if tail > 0 {
                heap.fill_with_filler(self.top, tail);
                self.wasted_words += tail;
            }
        }
        self.start = 0;
        self.top = 0;
        self.end = 0;
    }

    fn install(&mut self, start: usize, words: usize) {
        self.start = start;
        self.top = start;
        self.end = start + words;
        self.refills += 1;
    }

    fn next_desired(&mut self, min_words: usize, max_words: usize) -> usize {
        self.desired_words = if self.desired_words == 0 {
            min_words
        } else {
            (self.desired_words * 2).min(max_words)
        };
        self.desired_words.max(min_words).min(max_words)
    }

    /// Allocate `words`, refilling the LAB from the heap when needed
    ///
    /// # Returns
    /// * `Some(addr)` - object start inside the (possibly new) LAB
    /// * `None` - object too large for a LAB, or the heap has no space for a
    ///   refill; the caller falls back to a shared request
    pub fn allocate_or_refill(&mut self, heap: &Heap, words: usize) -> Option<usize> {
        if let Some(addr) = self.allocate(words) {
            return Some(addr);
        }
        let max = heap.max_lab_words();
        if words > max {
            return None;
        }

        self.retire(heap);
        let min = words.max(heap.min_lab_words());
        let desired = self.next_desired(min, max).max(min);
        let mut req = match self.kind {
            AllocType::Gclab => AllocRequest::for_gclab(min, desired),
            _ => AllocRequest::for_tlab(min, desired),
        };
        let start = heap.allocate(&mut req)?;
        self.install(start, req.actual_size());
        self.allocate(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_and_undo() {
        let mut lab = Lab::new(AllocType::Gclab);
        lab.install(100, 50);
        let a = lab.allocate(10).unwrap();
        let b = lab.allocate(5).unwrap();
        assert_eq!((a, b), (100, 110));
        assert!(!lab.undo_allocation(a, 10), "only the last object rolls back");
        assert!(lab.undo_allocation(b, 5));
        assert_eq!(lab.remaining(), 40);
        assert!(lab.allocate(41).is_none());
    }

    #[test]
    fn test_desired_size_doubles_to_cap() {
        let mut lab = Lab::new(AllocType::Tlab);
        assert_eq!(lab.next_desired(8, 40), 8);
        assert_eq!(lab.next_desired(8, 40), 16);
        assert_eq!(lab.next_desired(8, 40), 32);
        assert_eq!(lab.next_desired(8, 40), 40);
        assert_eq!(lab.next_desired(8, 40), 40);
    }
}
