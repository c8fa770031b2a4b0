//! Allocator Module - Allocation Requests and Local Allocation Buffers
//!
//! Every allocation in the heap is described by an [`AllocRequest`] and
//! served by the free set under the heap lock.
//!
//! ## Allocation Kinds
//!
//! - **TLAB**: mutator-private buffer, bump allocated without the lock
//! - **GCLAB**: collector-private buffer used for evacuation copies
//! - **Shared**: single mutator object, too large for a TLAB
//! - **Shared GC**: single evacuation copy, too large for a GCLAB
//!
//! ## Allocation Flow
//!
//! 1. Try the thread's LAB (fast path, no lock)
//! 2. LAB exhausted -> retire it (filler over the tail) and request a new one
//! 3. Object larger than a LAB -> shared request
//! 4. Object larger than the humongous threshold -> contiguous regions

pub mod tlab;

pub use tlab::Lab;

use crate::heap::region::RegionAllocKind;

/// Kind of allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocType {
    Tlab,
    Gclab,
    Shared,
    SharedGc,
}

impl AllocType {
    pub fn is_mutator(self) -> bool {
        matches!(self, AllocType::Tlab | AllocType::Shared)
    }

    pub fn is_gc(self) -> bool {
        !self.is_mutator()
    }

    pub fn is_lab(self) -> bool {
        matches!(self, AllocType::Tlab | AllocType::Gclab)
    }

    pub fn name(self) -> &'static str {
        match self {
            AllocType::Tlab => "TLAB",
            AllocType::Gclab => "GCLAB",
            AllocType::Shared => "Shared",
            AllocType::SharedGc => "Shared GC",
        }
    }

    pub(crate) fn region_kind(self) -> RegionAllocKind {
        match self {
            AllocType::Tlab => RegionAllocKind::Tlab,
            AllocType::Gclab => RegionAllocKind::Gclab,
            AllocType::Shared | AllocType::SharedGc => RegionAllocKind::Shared,
        }
    }
}

/// Allocation request
///
/// Sizes are in words. LAB requests carry a minimum: an elastic LAB may be
/// shrunk down to `min_words` to fit the remaining space of a region, and
/// `actual_words` reports what was handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    kind: AllocType,
    min_words: usize,
    size_words: usize,
    actual_words: usize,
}

impl AllocRequest {
    pub fn for_tlab(min_words: usize, size_words: usize) -> Self {
        Self::new(AllocType::Tlab, min_words, size_words)
    }

    pub fn for_gclab(min_words: usize, size_words: usize) -> Self {
        Self::new(AllocType::Gclab, min_words, size_words)
    }

    pub fn for_shared(size_words: usize) -> Self {
        Self::new(AllocType::Shared, size_words, size_words)
    }

    pub fn for_shared_gc(size_words: usize) -> Self {
        Self::new(AllocType::SharedGc, size_words, size_words)
    }

    fn new(kind: AllocType, min_words: usize, size_words: usize) -> Self {
        debug_assert!(min_words <= size_words);
        Self {
            kind,
            min_words,
            size_words,
            actual_words: 0,
        }
    }

    #[inline]
    pub fn kind(&self) -> AllocType {
        self.kind
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size_words
    }

    #[inline]
    pub fn min_size(&self) -> usize {
        self.min_words
    }

    /// Words actually allocated; zero until the request is served
    #[inline]
    pub fn actual_size(&self) -> usize {
        self.actual_words
    }

    pub(crate) fn set_actual_size(&mut self, words: usize) {
        self.actual_words = words;
    }

    pub fn is_mutator_alloc(&self) -> bool {
        self.kind.is_mutator()
    }

    pub fn is_gc_alloc(&self) -> bool {
        self.kind.is_gc()
    }

    pub fn is_lab_alloc(&self) -> bool {
        self.kind.is_lab()
    }
}
