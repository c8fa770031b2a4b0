//! Region Implementation - Unit of Heap Management
//!
//! A region is a fixed-size slice `[bottom, end)` of the heap word array.
//! Regions are never destroyed; they cycle through a small state machine:
//!
//! ```text
//!   EmptyUncommitted <──uncommit── EmptyCommitted <──recycle── Trash
//!          │                            │                        ▲
//!          └──────── allocate ──────────┤                        │
//!                                       ▼                        │
//!                     Regular ──make_cset──▶ CSet ──────────────▶┤
//!                      │  ▲                                      │
//!                 pin  ▼  │ unpin                                │
//!                     Pinned                                     │
//!   Empty ─▶ HumongousStart / HumongousCont ─────────────────────┘
//!                  │  ▲
//!             pin  ▼  │ unpin
//!          PinnedHumongousStart
//! ```
//!
//! # Memory Ordering Model
//!
//! ## State (AtomicU8)
//! - **Store:** `Ordering::Release` under the heap lock or inside a pause.
//!   Transitions are serialized by the caller, the atomic only publishes them.
//! - **Load:** `Ordering::Acquire` - barriers read the state concurrently
//!   (`in_cset` checks during evacuation).
//!
//! ## Top / TAMS / Watermark
//! - Mutated under the heap lock or at a safepoint, read by GC workers after
//!   a pause boundary, which already orders them. `Relaxed` loads/stores.
//!
//! ## Live data and allocation counters
//! - `Relaxed`: statistics merged at phase boundaries.

use crate::error::{Result, SgcError};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Region lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegionState {
    EmptyUncommitted = 0,
    EmptyCommitted = 1,
    Regular = 2,
    HumongousStart = 3,
    HumongousCont = 4,
    PinnedHumongousStart = 5,
    CSet = 6,
    Pinned = 7,
    Trash = 8,
}

impl RegionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RegionState::EmptyUncommitted,
            1 => RegionState::EmptyCommitted,
            2 => RegionState::Regular,
            3 => RegionState::HumongousStart,
            4 => RegionState::HumongousCont,
            5 => RegionState::PinnedHumongousStart,
            6 => RegionState::CSet,
            7 => RegionState::Pinned,
            _ => RegionState::Trash,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RegionState::EmptyUncommitted => "Empty Uncommitted",
            RegionState::EmptyCommitted => "Empty Committed",
            RegionState::Regular => "Regular",
            RegionState::HumongousStart => "Humongous Start",
            RegionState::HumongousCont => "Humongous Continuation",
            RegionState::PinnedHumongousStart => "Humongous Start, Pinned",
            RegionState::CSet => "Collection Set",
            RegionState::Pinned => "Pinned",
            RegionState::Trash => "Trash",
        }
    }

    /// Short tag used by region dumps
    pub fn tag(self) -> &'static str {
        match self {
            RegionState::EmptyUncommitted => "EU",
            RegionState::EmptyCommitted => "EC",
            RegionState::Regular => "R",
            RegionState::HumongousStart => "H",
            RegionState::HumongousCont => "HC",
            RegionState::PinnedHumongousStart => "HP",
            RegionState::CSet => "CS",
            RegionState::Pinned => "P",
            RegionState::Trash => "T",
        }
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of allocation served by a region, for per-kind counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionAllocKind {
    Tlab,
    Gclab,
    Shared,
}

/// Region - unit of heap management
pub struct Region {
    index: usize,
    bottom: usize,
    end: usize,
    top: AtomicUsize,
    state: AtomicU8,
    live_words: AtomicUsize,
    tams: AtomicUsize,
    update_watermark: AtomicUsize,
    critical_pins: AtomicUsize,
    seqnum_last_alloc: AtomicU64,
    empty_since_ms: AtomicU64,
    age: AtomicUsize,
    tlab_allocs: AtomicUsize,
    gclab_allocs: AtomicUsize,
    shared_allocs: AtomicUsize,
}

impl Region {
    /// Create region `index` covering `[bottom, bottom + words)`
    pub fn new(index: usize, bottom: usize, words: usize, committed: bool) -> Self {
        let state = if committed {
            RegionState::EmptyCommitted
        } else {
            RegionState::EmptyUncommitted
        };
        Self {
            index,
            bottom,
            end: bottom + words,
            top: AtomicUsize::new(bottom),
            state: AtomicU8::new(state as u8),
            live_words: AtomicUsize::new(0),
            tams: AtomicUsize::new(bottom),
            update_watermark: AtomicUsize::new(bottom),
            critical_pins: AtomicUsize::new(0),
            seqnum_last_alloc: AtomicU64::new(0),
            empty_since_ms: AtomicU64::new(0),
            age: AtomicUsize::new(0),
            tlab_allocs: AtomicUsize::new(0),
            gclab_allocs: AtomicUsize::new(0),
            shared_allocs: AtomicUsize::new(0),
        }
    }

    // === Geometry ===

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn bottom(&self) -> usize {
        self.bottom
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_top(&self, top: usize) {
        debug_assert!(top >= self.bottom && top <= self.end);
        self.top.store(top, Ordering::Relaxed);
    }

    #[inline]
    pub fn capacity_words(&self) -> usize {
        self.end - self.bottom
    }

    #[inline]
    pub fn used_words(&self) -> usize {
        self.top() - self.bottom
    }

    #[inline]
    pub fn free_words(&self) -> usize {
        self.end - self.top()
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom && addr < self.end
    }

    // === Marking metadata ===

    #[inline]
    pub fn tams(&self) -> usize {
        self.tams.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_tams(&self, tams: usize) {
        self.tams.store(tams, Ordering::Relaxed);
    }

    /// Capture top as TAMS; objects allocated later are implicitly live
    pub fn capture_top_at_mark_start(&self) {
        self.set_tams(self.top());
    }

    #[inline]
    pub fn update_watermark(&self) -> usize {
        self.update_watermark.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_update_watermark(&self, w: usize) {
        self.update_watermark.store(w, Ordering::Relaxed);
    }

    #[inline]
    pub fn live_words(&self) -> usize {
        self.live_words.load(Ordering::Relaxed)
    }

    pub fn add_live_words(&self, words: usize) {
        self.live_words.fetch_add(words, Ordering::Relaxed);
    }

    pub fn set_live_words(&self, words: usize) {
        self.live_words.store(words, Ordering::Relaxed);
    }

    pub fn clear_live_data(&self) {
        self.live_words.store(0, Ordering::Relaxed);
    }

    pub fn has_live(&self) -> bool {
        self.live_words() > 0
    }

    pub fn garbage_words(&self) -> usize {
        self.used_words().saturating_sub(self.live_words())
    }

    pub fn age(&self) -> usize {
        self.age.load(Ordering::Relaxed)
    }

    pub fn increment_age(&self) {
        self.age.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_age(&self) {
        self.age.store(0, Ordering::Relaxed);
    }

    pub fn seqnum_last_alloc(&self) -> u64 {
        self.seqnum_last_alloc.load(Ordering::Relaxed)
    }

    pub fn empty_since_ms(&self) -> u64 {
        self.empty_since_ms.load(Ordering::Relaxed)
    }

    // === Allocation ===

    /// Bump-allocate `words`; caller holds the heap lock
    pub fn allocate(&self, words: usize, kind: RegionAllocKind, seqnum: u64) -> Option<usize> {
        let top = self.top();
        if words > self.end - top {
            return None;
        }
        self.top.store(top + words, Ordering::Relaxed);
        self.seqnum_last_alloc.store(seqnum, Ordering::Relaxed);
        let counter = match kind {
            RegionAllocKind::Tlab => &self.tlab_allocs,
            RegionAllocKind::Gclab => &self.gclab_allocs,
            RegionAllocKind::Shared => &self.shared_allocs,
        };
        counter.fetch_add(words, Ordering::Relaxed);
        Some(top)
    }

    /// Words allocated by kind: (tlab, gclab, shared)
    pub fn alloc_counters(&self) -> (usize, usize, usize) {
        (
            self.tlab_allocs.load(Ordering::Relaxed),
            self.gclab_allocs.load(Ordering::Relaxed),
            self.shared_allocs.load(Ordering::Relaxed),
        )
    }

    fn reset_alloc_counters(&self) {
        self.tlab_allocs.store(0, Ordering::Relaxed);
        self.gclab_allocs.store(0, Ordering::Relaxed);
        self.shared_allocs.store(0, Ordering::Relaxed);
    }

    // === State ===

    #[inline]
    pub fn state(&self) -> RegionState {
        RegionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, s: RegionState) {
        self.state.store(s as u8, Ordering::Release);
    }

    fn illegal(&self, to: RegionState) -> SgcError {
        SgcError::IllegalTransition {
            region: self.index,
            from: self.state().name(),
            to: to.name(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(
            self.state(),
            RegionState::EmptyCommitted | RegionState::EmptyUncommitted
        )
    }

    pub fn is_committed(&self) -> bool {
        self.state() != RegionState::EmptyUncommitted
    }

    pub fn is_trash(&self) -> bool {
        self.state() == RegionState::Trash
    }

    pub fn is_regular(&self) -> bool {
        self.state() == RegionState::Regular
    }

    pub fn is_cset(&self) -> bool {
        self.state() == RegionState::CSet
    }

    pub fn is_pinned(&self) -> bool {
        matches!(
            self.state(),
            RegionState::Pinned | RegionState::PinnedHumongousStart
        )
    }

    pub fn is_humongous(&self) -> bool {
        matches!(
            self.state(),
            RegionState::HumongousStart
                | RegionState::HumongousCont
                | RegionState::PinnedHumongousStart
        )
    }

    pub fn is_humongous_start(&self) -> bool {
        matches!(
            self.state(),
            RegionState::HumongousStart | RegionState::PinnedHumongousStart
        )
    }

    pub fn is_humongous_continuation(&self) -> bool {
        self.state() == RegionState::HumongousCont
    }

    /// Holds objects: neither empty nor trash
    pub fn is_active(&self) -> bool {
        !self.is_empty() && !self.is_trash()
    }

    pub fn is_alloc_allowed(&self) -> bool {
        matches!(
            self.state(),
            RegionState::EmptyCommitted
                | RegionState::EmptyUncommitted
                | RegionState::Regular
                | RegionState::Pinned
        )
    }

    /// Regions a sliding Full GC may move objects out of and into
    pub fn is_move_allowed(&self) -> bool {
        matches!(self.state(), RegionState::Regular | RegionState::CSet)
    }

    pub fn make_regular_allocation(&self) -> Result<()> {
        match self.state() {
            RegionState::EmptyUncommitted | RegionState::EmptyCommitted => {
                self.reset_age();
                self.set_state(RegionState::Regular);
                Ok(())
            }
            RegionState::Regular | RegionState::Pinned => Ok(()),
            _ => Err(self.illegal(RegionState::Regular)),
        }
    }

    /// Full GC forces regions back to Regular
    pub fn make_regular_bypass(&self) -> Result<()> {
        match self.state() {
            RegionState::EmptyUncommitted
            | RegionState::EmptyCommitted
            | RegionState::CSet
            | RegionState::Regular => {
                self.set_state(RegionState::Regular);
                Ok(())
            }
            _ => Err(self.illegal(RegionState::Regular)),
        }
    }

    pub fn make_humongous_start(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(self.illegal(RegionState::HumongousStart));
        }
        self.reset_age();
        self.set_state(RegionState::HumongousStart);
        Ok(())
    }

    pub fn make_humongous_cont(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(self.illegal(RegionState::HumongousCont));
        }
        self.reset_age();
        self.set_state(RegionState::HumongousCont);
        Ok(())
    }

    /// Add one critical pin; the first pin changes the state
    pub fn make_pinned(&self) -> Result<()> {
        match self.state() {
            RegionState::Regular => self.set_state(RegionState::Pinned),
            RegionState::HumongousStart => self.set_state(RegionState::PinnedHumongousStart),
            RegionState::Pinned | RegionState::PinnedHumongousStart => {}
            _ => return Err(self.illegal(RegionState::Pinned)),
        }
        self.critical_pins.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drop one critical pin; the last pin restores the state
    pub fn make_unpinned(&self) -> Result<()> {
        let pins = self.critical_pins.load(Ordering::Relaxed);
        if pins == 0 || !self.is_pinned() {
            return Err(self.illegal(RegionState::Regular));
        }
        self.critical_pins.store(pins - 1, Ordering::Relaxed);
        if pins == 1 {
            match self.state() {
                RegionState::Pinned => self.set_state(RegionState::Regular),
                _ => self.set_state(RegionState::HumongousStart),
            }
        }
        Ok(())
    }

    pub fn pin_count(&self) -> usize {
        self.critical_pins.load(Ordering::Relaxed)
    }

    pub fn make_cset(&self) -> Result<()> {
        if self.state() != RegionState::Regular {
            return Err(self.illegal(RegionState::CSet));
        }
        self.set_state(RegionState::CSet);
        Ok(())
    }

    pub fn make_trash(&self) -> Result<()> {
        match self.state() {
            RegionState::CSet
            | RegionState::Regular
            | RegionState::HumongousStart
            | RegionState::HumongousCont => {
                self.set_state(RegionState::Trash);
                Ok(())
            }
            _ => Err(self.illegal(RegionState::Trash)),
        }
    }

    /// Trash -> EmptyCommitted; resets allocation and marking metadata
    pub fn recycle(&self, now_ms: u64) -> Result<()> {
        if !self.is_trash() {
            return Err(self.illegal(RegionState::EmptyCommitted));
        }
        self.top.store(self.bottom, Ordering::Relaxed);
        self.clear_live_data();
        self.set_tams(self.bottom);
        self.set_update_watermark(self.bottom);
        self.reset_alloc_counters();
        self.reset_age();
        self.empty_since_ms.store(now_ms, Ordering::Relaxed);
        self.set_state(RegionState::EmptyCommitted);
        Ok(())
    }

    /// Full GC: an emptied movable region returns straight to EmptyCommitted
    pub fn make_empty_after_compaction(&self, now_ms: u64) -> Result<()> {
        match self.state() {
            RegionState::Regular | RegionState::CSet => {
                self.set_state(RegionState::Trash);
                self.recycle(now_ms)
            }
            RegionState::EmptyCommitted | RegionState::EmptyUncommitted => Ok(()),
            _ => Err(self.illegal(RegionState::EmptyCommitted)),
        }
    }

    /// EmptyCommitted -> EmptyUncommitted; accounting only
    pub fn make_uncommitted(&self) -> Result<()> {
        if self.state() != RegionState::EmptyCommitted {
            return Err(self.illegal(RegionState::EmptyUncommitted));
        }
        self.set_state(RegionState::EmptyUncommitted);
        Ok(())
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "|{:5}|{:2}|BTE {:#x}, {:#x}, {:#x}|TAMS {:#x}|U {}|L {}|CP {}",
            self.index,
            self.state().tag(),
            self.bottom,
            self.top(),
            self.end,
            self.tams(),
            self.used_words() * 8,
            self.live_words() * 8,
            self.pin_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::new(3, 3 * 128, 128, true)
    }

    #[test]
    fn test_allocate_bumps_top() {
        let r = region();
        assert_eq!(r.allocate(10, RegionAllocKind::Shared, 1), Some(384));
        assert_eq!(r.top(), 394);
        assert_eq!(r.used_words(), 10);
        assert_eq!(r.allocate(200, RegionAllocKind::Shared, 2), None);
        assert_eq!(r.alloc_counters(), (0, 0, 10));
    }

    #[test]
    fn test_regular_lifecycle() {
        let r = region();
        r.make_regular_allocation().unwrap();
        r.make_cset().unwrap();
        assert!(r.is_cset());
        r.make_trash().unwrap();
        r.recycle(5).unwrap();
        assert_eq!(r.state(), RegionState::EmptyCommitted);
        assert_eq!(r.empty_since_ms(), 5);
        assert_eq!(r.top(), r.bottom());
    }

    #[test]
    fn test_illegal_transitions() {
        let r = region();
        assert!(r.make_cset().is_err(), "empty region cannot join the cset");
        assert!(r.recycle(0).is_err(), "only trash recycles");
        r.make_humongous_start().unwrap();
        assert!(r.make_cset().is_err(), "humongous never joins the cset");
        assert!(matches!(
            r.make_regular_allocation(),
            Err(SgcError::IllegalTransition { region: 3, .. })
        ));
    }

    #[test]
    fn test_pin_counting() {
        let r = region();
        r.make_regular_allocation().unwrap();
        r.make_pinned().unwrap();
        r.make_pinned().unwrap();
        assert!(r.make_cset().is_err(), "pinned regions are not evacuated");
        r.make_unpinned().unwrap();
        assert!(r.is_pinned());
        r.make_unpinned().unwrap();
        assert!(r.is_regular());
        assert!(r.make_unpinned().is_err());
    }

    #[test]
    fn test_uncommit_only_from_committed_empty() {
        let r = region();
        r.make_uncommitted().unwrap();
        assert!(!r.is_committed());
        assert!(r.make_uncommitted().is_err());
        r.make_regular_allocation().unwrap();
        assert!(r.is_committed());
    }
}
