//! Heap Management Module - Region Directory
//!
//! The heap is one contiguous array of 64-bit words, split into equal
//! power-of-two sized regions. Objects are addressed by word index
//! ([`ObjRef`]), so every access is a bounds-checked array access.
//!
//! Heap Structure:
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        word array                           │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐        │
//! │  │ Region 0 │ │ Region 1 │ │ Region 2 │ │   ...    │        │
//! │  │ Regular  │ │ Humongous│ │  CSet    │ │  Empty   │        │
//! │  └──────────┘ └──────────┘ └──────────┘ └──────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//!   region(addr) = addr >> region_shift
//! ```
//!
//! The heap owns:
//! - the region table and its state machine ([`region`]);
//! - the free set, guarded by the heap lock ([`free_set`]);
//! - the collection set ([`collection_set`]);
//! - the mark bitmap and used/committed accounting.
//!
//! Collector phases and barriers are layered on top in `gc`, `marker`,
//! `barrier` and `relocate`.

pub mod collection_set;
pub mod free_set;
pub mod region;

pub use collection_set::CollectionSet;
pub use free_set::FreeSet;
pub use region::{Region, RegionAllocKind, RegionState};

use crate::allocator::AllocRequest;
use crate::config::GcConfig;
use crate::error::{Result, SgcError};
use crate::marker::bitmap::MarkBitmap;
use crate::object::header::{KLASS_WORD, MARK_WORD, SHAPE_WORD};
use crate::object::{Klass, MarkWord, ObjRef, Shape, HEADER_WORDS};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Allocation parameters derived from the configuration
#[derive(Debug, Clone)]
pub struct HeapParams {
    pub region_words: usize,
    pub region_shift: u32,
    pub humongous_threshold_words: usize,
    pub min_lab_words: usize,
    pub max_lab_words: usize,
    pub use_tlab: bool,
    pub elastic_tlab: bool,
    pub evac_reserve: usize,
    pub evac_reserve_overflow: bool,
    pub allow_mixed_allocs: bool,
}

impl HeapParams {
    fn from_config(config: &GcConfig) -> Result<Self> {
        let region_bytes = config.region_size_bytes();
        if !region_bytes.is_power_of_two() || region_bytes < 64 {
            return Err(SgcError::HeapInitialization(format!(
                "region size {} is not a usable power of two",
                region_bytes
            )));
        }
        let region_words = region_bytes / 8;
        Ok(Self {
            region_words,
            region_shift: region_words.trailing_zeros(),
            humongous_threshold_words: (region_words * config.humongous_threshold / 100)
                .max(HEADER_WORDS),
            min_lab_words: (config.min_tlab_size / 8).max(HEADER_WORDS),
            max_lab_words: (config.max_tlab_bytes() / 8).max(HEADER_WORDS),
            use_tlab: config.use_tlab,
            elastic_tlab: config.elastic_tlab,
            evac_reserve: config.evac_reserve,
            evac_reserve_overflow: config.evac_reserve_overflow,
            allow_mixed_allocs: config.allow_mixed_allocs,
        })
    }
}

/// Heap - word array plus region directory
pub struct Heap {
    memory: Box<[AtomicU64]>,
    regions: Vec<Region>,
    params: HeapParams,

    /// Heap lock; every free-set access and allocation-time region
    /// transition happens under it
    free_set: Mutex<FreeSet>,

    collection_set: CollectionSet,
    mark_bitmap: MarkBitmap,

    /// Bytes between bottom and top of all non-empty regions
    used: AtomicUsize,
    committed: AtomicUsize,
    bytes_allocated_since_gc_start: AtomicUsize,
    alloc_seqnum: AtomicU64,
    epoch: Instant,
}

impl Heap {
    /// Create the heap described by `config`
    ///
    /// Regions past `initial_heap_size` start uncommitted.
    ///
    /// # Returns
    /// * `Ok(Heap)` - with the free set rebuilt
    /// * `Err(SgcError::HeapInitialization)` - region geometry is invalid
    pub fn new(config: &GcConfig) -> Result<Self> {
        let params = HeapParams::from_config(config)?;
        let region_count = config.region_count();
        if region_count == 0 {
            return Err(SgcError::HeapInitialization(format!(
                "heap of {} bytes holds no region of {} bytes",
                config.max_heap_size,
                config.region_size_bytes()
            )));
        }
        let region_bytes = params.region_words * 8;
        let initial_regions = ((config.initial_heap_size + region_bytes - 1) / region_bytes)
            .clamp(1, region_count);

        let heap_words = region_count * params.region_words;
        let memory: Box<[AtomicU64]> = (0..heap_words).map(|_| AtomicU64::new(0)).collect();
        let regions = (0..region_count)
            .map(|i| {
                Region::new(
                    i,
                    i * params.region_words,
                    params.region_words,
                    i < initial_regions,
                )
            })
            .collect();

        let heap = Self {
            memory,
            regions,
            free_set: Mutex::new(FreeSet::new(region_count)),
            collection_set: CollectionSet::new(region_count),
            mark_bitmap: MarkBitmap::new(heap_words),
            used: AtomicUsize::new(0),
            committed: AtomicUsize::new(initial_regions * region_bytes),
            bytes_allocated_since_gc_start: AtomicUsize::new(0),
            alloc_seqnum: AtomicU64::new(1),
            epoch: Instant::now(),
            params,
        };
        heap.free_set.lock().rebuild(&heap);

        log::info!(
            target: "sgc",
            "Heap: {} regions of {}K, {}K committed",
            region_count,
            region_bytes / 1024,
            heap.committed() / 1024
        );
        Ok(heap)
    }

    // === Geometry ===

    #[inline]
    pub fn params(&self) -> &HeapParams {
        &self.params
    }

    #[inline]
    pub fn region_words(&self) -> usize {
        self.params.region_words
    }

    #[inline]
    pub fn region_bytes(&self) -> usize {
        self.params.region_words * 8
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    #[inline]
    pub fn region(&self, idx: usize) -> &Region {
        &self.regions[idx]
    }

    #[inline]
    pub fn heap_words(&self) -> usize {
        self.memory.len()
    }

    #[inline]
    pub fn region_index_of_addr(&self, addr: usize) -> usize {
        addr >> self.params.region_shift
    }

    /// Region holding the header of `obj`; `obj` must be in the heap
    #[inline]
    pub fn region_of(&self, obj: ObjRef) -> &Region {
        &self.regions[self.region_index_of_addr(obj.addr())]
    }

    #[inline]
    pub fn humongous_threshold_words(&self) -> usize {
        self.params.humongous_threshold_words
            .min(self.params.region_words)
    }

    #[inline]
    pub fn min_lab_words(&self) -> usize {
        self.params.min_lab_words
    }

    #[inline]
    pub fn max_lab_words(&self) -> usize {
        self.params.max_lab_words
    }

    /// Is `obj` a non-null reference into the word array?
    #[inline]
    pub fn is_in(&self, obj: ObjRef) -> bool {
        !obj.is_null() && obj.addr() + HEADER_WORDS <= self.memory.len()
    }

    /// Bounds check for references coming from outside the collector
    pub fn check_ref(&self, obj: ObjRef) -> Result<()> {
        if obj.is_null() {
            return Err(SgcError::NullReference);
        }
        if !self.is_in(obj) {
            return Err(SgcError::BoundsCheckFailed {
                index: obj.addr(),
                length: self.memory.len(),
            });
        }
        Ok(())
    }

    // === Accounting ===

    pub fn max_capacity(&self) -> usize {
        self.memory.len() * 8
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Relaxed)
    }

    pub(crate) fn increase_used(&self, bytes: usize) {
        self.used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn decrease_used(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |u| {
                Some(u.saturating_sub(bytes))
            });
    }

    pub(crate) fn set_used(&self, bytes: usize) {
        self.used.store(bytes, Ordering::Relaxed);
    }

    pub(crate) fn increase_allocated(&self, bytes: usize) {
        self.bytes_allocated_since_gc_start
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_allocated_since_gc_start(&self) -> usize {
        self.bytes_allocated_since_gc_start.load(Ordering::Relaxed)
    }

    pub fn reset_bytes_allocated_since_gc_start(&self) {
        self.bytes_allocated_since_gc_start
            .store(0, Ordering::Relaxed);
    }

    pub(crate) fn next_alloc_seqnum(&self) -> u64 {
        self.alloc_seqnum.fetch_add(1, Ordering::Relaxed)
    }

    /// Sequence number the next allocation will get
    pub fn alloc_seqnum(&self) -> u64 {
        self.alloc_seqnum.load(Ordering::Relaxed)
    }

    pub(crate) fn note_committed(&self, _r: &Region) {
        self.committed
            .fetch_add(self.region_bytes(), Ordering::Relaxed);
    }

    /// Milliseconds since the heap was created
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Sum of `top - bottom` over all regions
    pub fn recompute_used(&self) -> usize {
        let used = self
            .regions
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.used_words() * 8)
            .sum();
        self.set_used(used);
        used
    }

    // === Free set ===

    /// Take the heap lock
    pub fn lock(&self) -> MutexGuard<'_, FreeSet> {
        self.free_set.lock()
    }

    /// Serve an allocation request under the heap lock
    pub fn allocate(&self, req: &mut AllocRequest) -> Option<usize> {
        self.free_set.lock().allocate(self, req)
    }

    /// Bytes the mutator view can still hand out
    pub fn available(&self) -> usize {
        self.free_set.lock().available()
    }

    /// Trash -> Empty, clearing the region's marks
    ///
    /// Only legal once no reference into the region remains. Caller holds
    /// the heap lock or runs inside a pause.
    pub fn recycle_region(&self, r: &Region) -> Result<()> {
        let used = r.used_words() * 8;
        r.recycle(self.now_ms())?;
        self.mark_bitmap.clear_range(r.bottom(), r.end());
        self.decrease_used(used);
        Ok(())
    }

    /// Uncommit regions that have been empty for at least `delay_ms`
    ///
    /// The word array stays allocated; only the committed accounting and
    /// the region state change.
    pub fn uncommit_regions(&self, delay_ms: u64) -> usize {
        let _lock = self.free_set.lock();
        let now = self.now_ms();
        let mut count = 0;
        for r in &self.regions {
            if r.state() == RegionState::EmptyCommitted
                && now.saturating_sub(r.empty_since_ms()) >= delay_ms
                && r.make_uncommitted().is_ok()
            {
                self.committed
                    .fetch_sub(self.region_bytes(), Ordering::Relaxed);
                count += 1;
            }
        }
        if count > 0 {
            log::debug!(target: "sgc", "Uncommitted {} regions", count);
        }
        count
    }

    // === Collection set and marking ===

    #[inline]
    pub fn collection_set(&self) -> &CollectionSet {
        &self.collection_set
    }

    #[inline]
    pub fn mark_bitmap(&self) -> &MarkBitmap {
        &self.mark_bitmap
    }

    /// Is the object in a collection set region?
    #[inline]
    pub fn in_cset(&self, obj: ObjRef) -> bool {
        !obj.is_null() && self.collection_set.is_in(self.region_index_of_addr(obj.addr()))
    }

    /// Complete-marking liveness: marked, or allocated after mark start
    #[inline]
    pub fn is_marked(&self, obj: ObjRef) -> bool {
        let addr = obj.addr();
        addr >= self.region_of(obj).tams() || self.mark_bitmap.is_marked(addr)
    }

    /// Set the mark bit; objects above TAMS are never traced
    ///
    /// # Returns
    /// True if this call marked the object and the caller must trace it
    #[inline]
    pub fn mark_object(&self, obj: ObjRef) -> bool {
        let addr = obj.addr();
        addr < self.region_of(obj).tams() && self.mark_bitmap.mark(addr)
    }

    // === Word access ===

    #[inline]
    pub fn load_word(&self, addr: usize) -> u64 {
        self.memory[addr].load(Ordering::Acquire)
    }

    #[inline]
    pub fn store_word(&self, addr: usize, value: u64) {
        self.memory[addr].store(value, Ordering::Release);
    }

    #[inline]
    pub fn cas_word(&self, addr: usize, expected: u64, new: u64) -> std::result::Result<u64, u64> {
        self.memory[addr].compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
    }

    // === Object access ===

    #[inline]
    pub fn mark(&self, obj: ObjRef) -> MarkWord {
        MarkWord::decode(self.load_word(obj.addr() + MARK_WORD))
    }

    #[inline]
    pub fn set_mark(&self, obj: ObjRef, mark: MarkWord) {
        self.store_word(obj.addr() + MARK_WORD, mark.encode());
    }

    /// Swap the mark word; the single winner of racing installs gets `Ok`
    #[inline]
    pub fn cas_mark(
        &self,
        obj: ObjRef,
        expected: MarkWord,
        new: MarkWord,
    ) -> std::result::Result<(), MarkWord> {
        self.cas_word(obj.addr() + MARK_WORD, expected.encode(), new.encode())
            .map(|_| ())
            .map_err(MarkWord::decode)
    }

    #[inline]
    pub fn klass(&self, obj: ObjRef) -> Option<Klass> {
        Klass::decode(self.load_word(obj.addr() + KLASS_WORD))
    }

    #[inline]
    pub fn shape(&self, obj: ObjRef) -> Shape {
        Shape::decode(self.load_word(obj.addr() + SHAPE_WORD))
    }

    #[inline]
    pub fn object_size(&self, obj: ObjRef) -> usize {
        self.shape(obj).size_words()
    }

    /// Canonical copy of `obj`
    #[inline]
    pub fn resolve(&self, obj: ObjRef) -> ObjRef {
        if obj.is_null() {
            return obj;
        }
        self.mark(obj).forwardee().unwrap_or(obj)
    }

    #[inline]
    pub fn is_forwarded(&self, obj: ObjRef) -> bool {
        self.mark(obj).forwardee().is_some()
    }

    #[inline]
    pub fn ref_slot_addr(&self, obj: ObjRef, index: usize) -> usize {
        obj.addr() + HEADER_WORDS + index
    }

    #[inline]
    pub fn prim_addr(&self, obj: ObjRef, index: usize) -> usize {
        obj.addr() + HEADER_WORDS + self.shape(obj).refs as usize + index
    }

    #[inline]
    pub fn load_ref_slot(&self, obj: ObjRef, index: usize) -> ObjRef {
        ObjRef::from_raw(self.load_word(self.ref_slot_addr(obj, index)))
    }

    #[inline]
    pub fn store_ref_slot(&self, obj: ObjRef, index: usize, value: ObjRef) {
        self.store_word(self.ref_slot_addr(obj, index), value.raw());
    }

    #[inline]
    pub fn cas_ref_slot(
        &self,
        obj: ObjRef,
        index: usize,
        expected: ObjRef,
        new: ObjRef,
    ) -> std::result::Result<ObjRef, ObjRef> {
        self.cas_word(self.ref_slot_addr(obj, index), expected.raw(), new.raw())
            .map(ObjRef::from_raw)
            .map_err(ObjRef::from_raw)
    }

    #[inline]
    pub fn load_prim(&self, obj: ObjRef, index: usize) -> u64 {
        self.load_word(self.prim_addr(obj, index))
    }

    #[inline]
    pub fn store_prim(&self, obj: ObjRef, index: usize, value: u64) {
        self.store_word(self.prim_addr(obj, index), value);
    }

    /// Write a fresh header and zero the payload
    pub fn init_object(&self, addr: usize, klass: Klass, shape: Shape) -> ObjRef {
        let size = shape.size_words();
        for a in addr + HEADER_WORDS..addr + size {
            self.memory[a].store(0, Ordering::Relaxed);
        }
        self.memory[addr + SHAPE_WORD].store(shape.encode(), Ordering::Relaxed);
        self.memory[addr + KLASS_WORD].store(klass.encode(), Ordering::Relaxed);
        self.store_word(addr + MARK_WORD, MarkWord::Normal.encode());
        ObjRef::from_addr(addr)
    }

    /// Overwrite `[addr, addr + words)` with a filler so walkers skip it
    pub fn fill_with_filler(&self, addr: usize, words: usize) {
        if words > 0 {
            self.store_word(addr + MARK_WORD, MarkWord::Filler(words).encode());
        }
    }

    /// Copy words `1..size` (everything but the mark word) of `from` to `to`
    pub fn copy_object_body(&self, from: usize, to: usize, size: usize) {
        for i in 1..size {
            let w = self.memory[from + i].load(Ordering::Relaxed);
            self.memory[to + i].store(w, Ordering::Relaxed);
        }
    }

    // === Walking ===

    /// Visit every object in `[r.bottom(), limit)`, skipping fillers
    ///
    /// The callback receives each object and its size in words. A
    /// humongous start region yields its single object; continuations
    /// yield nothing.
    pub fn walk_region<F>(&self, r: &Region, limit: usize, mut f: F)
    where
        F: FnMut(ObjRef, usize),
    {
        if r.is_humongous_continuation() {
            return;
        }
        let mut addr = r.bottom();
        let limit = limit.min(self.memory.len());
        while addr < limit {
            match MarkWord::decode(self.load_word(addr)) {
                MarkWord::Filler(words) => {
                    addr += words.max(1);
                }
                _ => {
                    let obj = ObjRef::from_addr(addr);
                    if self.klass(obj).is_none() {
                        log::error!(
                            target: "sgc",
                            "Unparseable object at {:#x} in region {}",
                            addr,
                            r.index()
                        );
                        return;
                    }
                    let size = self.object_size(obj);
                    f(obj, size);
                    addr += size;
                }
            }
        }
    }

    /// Visit every live object of `r` below `limit`
    pub fn walk_live_objects<F>(&self, r: &Region, limit: usize, mut f: F)
    where
        F: FnMut(ObjRef, usize),
    {
        self.walk_region(r, limit, |obj, size| {
            if self.is_marked(obj) {
                f(obj, size)
            }
        });
    }

    /// Index of the humongous start region for region `idx`
    pub fn humongous_start_of(&self, mut idx: usize) -> usize {
        while idx > 0 && self.regions[idx].is_humongous_continuation() {
            idx -= 1;
        }
        idx
    }

    /// Number of regions spanned by the humongous object starting at `start`
    pub fn humongous_span(&self, start: usize) -> usize {
        let mut end = start + 1;
        while end < self.regions.len() && self.regions[end].is_humongous_continuation() {
            end += 1;
        }
        end - start
    }

    /// Log every region at trace level
    pub fn log_regions(&self) {
        if log::log_enabled!(target: "sgc", log::Level::Trace) {
            for r in &self.regions {
                log::trace!(target: "sgc", "{:?}", r);
            }
        }
    }
}
