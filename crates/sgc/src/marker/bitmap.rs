//! Mark Bitmap - Tracking Marked Objects
//!
//! One bit per heap word, so every object start has its own bit:
//!
//! ```text
//! Heap word address: 4100
//! - Bitmap word: 4100 / 64 = 64
//! - Bit offset:  4100 % 64 = 4
//! ```
//!
//! The bitmap is shared by all regions. An object below its region's TAMS
//! is live iff its bit is set; objects at or above TAMS were allocated
//! during marking and are implicitly live (see `Heap::is_marked`).

use std::sync::atomic::{AtomicU64, Ordering};

/// MarkBitmap - one bit per heap word
pub struct MarkBitmap {
    bits: Box<[AtomicU64]>,
    covered_words: usize,
}

impl MarkBitmap {
    /// Create a cleared bitmap covering `heap_words` words
    pub fn new(heap_words: usize) -> Self {
        let word_count = (heap_words + 63) / 64;
        let bits = (0..word_count).map(|_| AtomicU64::new(0)).collect();
        Self {
            bits,
            covered_words: heap_words,
        }
    }

    #[inline]
    fn indices(addr: usize) -> (usize, u64) {
        (addr / 64, 1u64 << (addr % 64))
    }

    /// Set the bit for `addr`
    ///
    /// # Returns
    /// True if this call set the bit; false if it was already marked. Only
    /// the caller that gets true traces the object.
    #[inline]
    pub fn mark(&self, addr: usize) -> bool {
        let (word, mask) = Self::indices(addr);
        match self.bits.get(word) {
            Some(bits) => bits.fetch_or(mask, Ordering::AcqRel) & mask == 0,
            None => false,
        }
    }

    #[inline]
    pub fn is_marked(&self, addr: usize) -> bool {
        let (word, mask) = Self::indices(addr);
        self.bits
            .get(word)
            .map_or(false, |bits| bits.load(Ordering::Acquire) & mask != 0)
    }

    /// Clear bits for `[start, end)`
    pub fn clear_range(&self, start: usize, end: usize) {
        let end = end.min(self.covered_words);
        let mut addr = start;
        while addr < end {
            let (word, _) = Self::indices(addr);
            let bit = addr % 64;
            if bit == 0 && addr + 64 <= end {
                self.bits[word].store(0, Ordering::Relaxed);
                addr += 64;
            } else {
                let upto = (end - addr).min(64 - bit);
                let mask = if upto == 64 {
                    u64::MAX
                } else {
                    ((1u64 << upto) - 1) << bit
                };
                self.bits[word].fetch_and(!mask, Ordering::Relaxed);
                addr += upto;
            }
        }
    }

    /// Clear all bits
    pub fn clear(&self) {
        for word in self.bits.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Is any bit in `[start, end)` set?
    pub fn is_range_clear(&self, start: usize, end: usize) -> bool {
        (start..end.min(self.covered_words)).all(|addr| !self.is_marked(addr))
    }

    /// Count marked words
    pub fn count_marked(&self) -> usize {
        self.bits
            .iter()
            .map(|word| word.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_once() {
        let bitmap = MarkBitmap::new(1024);
        assert!(bitmap.mark(70));
        assert!(!bitmap.mark(70), "second marker must lose");
        assert!(bitmap.is_marked(70));
        assert!(!bitmap.is_marked(71));
    }

    #[test]
    fn test_out_of_range_is_unmarked() {
        let bitmap = MarkBitmap::new(64);
        assert!(!bitmap.mark(10_000));
        assert!(!bitmap.is_marked(10_000));
    }

    #[test]
    fn test_clear_range_partial_words() {
        let bitmap = MarkBitmap::new(512);
        for addr in [3, 63, 64, 100, 200, 300] {
            bitmap.mark(addr);
        }
        bitmap.clear_range(60, 201);
        assert!(bitmap.is_marked(3));
        assert!(!bitmap.is_marked(63));
        assert!(!bitmap.is_marked(64));
        assert!(!bitmap.is_marked(200));
        assert!(bitmap.is_marked(300));
        assert_eq!(bitmap.count_marked(), 2);
    }
}
