//! Region Counters - Periodic Region Sampling
//!
//! Each sample encodes one word per region:
//!
//! ```text
//!  63        48 47          24 23           0
//! ┌────────────┬──────────────┬──────────────┐
//! │   flags    │   live KB    │   used KB    │
//! └────────────┴──────────────┴──────────────┘
//! ```
//!
//! plus a status word for the heap (marking = 1, evacuation = 2).

use crate::heap::Heap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const KB_MASK: u64 = (1 << 24) - 1;
const LIVE_SHIFT: u32 = 24;
const FLAGS_SHIFT: u32 = 48;

pub const FLAG_CSET: u64 = 1 << 1;
pub const FLAG_HUMONGOUS: u64 = 1 << 2;
pub const FLAG_RECENTLY_ALLOCATED: u64 = 1 << 3;
pub const FLAG_PINNED: u64 = 1 << 4;

pub const STATUS_MARKING: u64 = 1;
pub const STATUS_EVACUATING: u64 = 2;

/// Encode one region sample
pub fn encode(used_bytes: usize, live_bytes: usize, flags: u64) -> u64 {
    let used_kb = (used_bytes as u64 / 1024) & KB_MASK;
    let live_kb = (live_bytes as u64 / 1024) & KB_MASK;
    used_kb | (live_kb << LIVE_SHIFT) | (flags << FLAGS_SHIFT)
}

/// Decode a region sample into (used KB, live KB, flags)
pub fn decode(raw: u64) -> (u64, u64, u64) {
    (
        raw & KB_MASK,
        (raw >> LIVE_SHIFT) & KB_MASK,
        raw >> FLAGS_SHIFT,
    )
}

pub struct RegionCounters {
    data: Vec<AtomicU64>,
    status: AtomicU64,
    timestamp_ms: AtomicU64,
    samples: AtomicU64,
    last_seqnum: AtomicU64,
    /// Serializes samplers
    lock: Mutex<()>,
}

impl RegionCounters {
    pub fn new(region_count: usize) -> Self {
        Self {
            data: (0..region_count).map(|_| AtomicU64::new(0)).collect(),
            status: AtomicU64::new(0),
            timestamp_ms: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            last_seqnum: AtomicU64::new(0),
            lock: Mutex::new(()),
        }
    }

    /// Sample every region of `heap`
    pub fn sample(&self, heap: &Heap, status: u64) {
        let Some(_guard) = self.lock.try_lock() else {
            return;
        };
        let since = self.last_seqnum.swap(heap.alloc_seqnum(), Ordering::Relaxed);

        for (r, slot) in heap.regions().iter().zip(&self.data) {
            let mut flags = 0;
            if r.is_cset() {
                flags |= FLAG_CSET;
            }
            if r.is_humongous() {
                flags |= FLAG_HUMONGOUS;
            }
            if r.is_pinned() {
                flags |= FLAG_PINNED;
            }
            if r.seqnum_last_alloc() > since {
                flags |= FLAG_RECENTLY_ALLOCATED;
            }
            let used = if r.is_empty() { 0 } else { r.used_words() * 8 };
            slot.store(encode(used, r.live_words() * 8, flags), Ordering::Relaxed);
        }

        self.status.store(status, Ordering::Relaxed);
        self.timestamp_ms.store(heap.now_ms(), Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn region_data(&self, idx: usize) -> u64 {
        self.data
            .get(idx)
            .map(|d| d.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn status(&self) -> u64 {
        self.status.load(Ordering::Relaxed)
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}
