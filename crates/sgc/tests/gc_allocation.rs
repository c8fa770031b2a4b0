//! GC Allocation Tests - TLABs, Humongous Objects and Out of Memory
//!
//! These tests verify that allocation:
//! - Hands out distinct, zeroed objects of the requested shape
//! - Places objects larger than a region in humongous regions
//! - Runs GCs on failure and reports OutOfMemory only after Full GC
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC ALLOCATION BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{assert_prim_array, churn, RuntimeFixture};
use sgc::{CycleKind, SgcError};

// ============================================================================
// BASIC ALLOCATION
// ============================================================================

/// Objects from the same TLAB must not overlap and must start zeroed
///
/// **Bug this finds:** Bump pointer arithmetic errors, missing payload zeroing
/// **Invariant verified:** Every allocation is fresh memory
#[test]
fn test_allocations_are_distinct_and_zeroed() {
    // Arrange
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");

    // Act
    let arrays: Vec<_> = (0..100)
        .map(|i| {
            let h = m.alloc_prim_array(32).expect("allocation");
            for w in 0..4 {
                assert_eq!(m.load_word(h, w).unwrap(), 0, "payload not zeroed");
            }
            m.store_word(h, 0, i).unwrap();
            m.store_word(h, 3, i * 3).unwrap();
            h
        })
        .collect();

    // Assert
    for (i, h) in arrays.iter().enumerate() {
        assert_eq!(m.load_word(*h, 0).unwrap(), i as u64, "object {} overwritten", i);
        assert_eq!(m.load_word(*h, 3).unwrap(), i as u64 * 3);
        assert_prim_array(&m, *h, 4);
    }
}

/// Allocated bytes are charged to the allocating thread
///
/// **Bug this finds:** Lost accounting for TLAB allocations
/// **Invariant verified:** allocated_bytes == sum of object sizes
#[test]
fn test_allocated_bytes_accounting() {
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");

    m.alloc_prim_array(16).unwrap(); // 3 header + 2 words
    m.alloc_ref_array(4).unwrap(); // 3 header + 4 refs

    assert_eq!(m.allocated_bytes(), (5 + 7) * 8);
}

/// With TLABs off every allocation takes the shared path
///
/// **Bug this finds:** Allocation path that silently depends on a TLAB
/// **Invariant verified:** -XX:-UseTLAB still allocates and survives GC
#[test]
fn test_shared_allocation_without_tlab() {
    let fixture = RuntimeFixture::with_options(&["-XX:-UseTLAB", "-XX:ShenandoahGCHeuristics=passive"]);
    let m = fixture.attach("main");
    assert!(!fixture.runtime.state().config().use_tlab);

    let h = m.alloc_prim_array(64).unwrap();
    m.store_word(h, 7, 77).unwrap();
    m.system_gc().unwrap();

    assert_eq!(m.load_word(h, 7).unwrap(), 77);
}

// ============================================================================
// HUMONGOUS OBJECTS
// ============================================================================

/// An object larger than a region spans contiguous regions
///
/// **Bug this finds:** Humongous requests served from a single region
/// **Invariant verified:** Heap usage grows by whole regions; contents survive GC
#[test]
fn test_humongous_allocation_spans_regions() {
    // Arrange
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");
    let region = fixture.region_bytes();
    let used_before = fixture.used();

    // Act
    let big = m.alloc_prim_array(2 * region).expect("humongous allocation");
    m.store_word(big, 0, 1).unwrap();
    let last = 2 * region / 8 - 1;
    m.store_word(big, last, 2).unwrap();

    // Assert
    assert!(
        fixture.used() - used_before >= 2 * region,
        "humongous object must occupy at least two regions"
    );
    let humongous = fixture
        .runtime
        .state()
        .heap()
        .regions()
        .iter()
        .filter(|r| r.is_humongous())
        .count();
    assert_eq!(humongous, 3, "2 regions of payload plus the header spill");

    m.system_gc().unwrap();
    assert_eq!(m.load_word(big, 0).unwrap(), 1);
    assert_eq!(m.load_word(big, last).unwrap(), 2);
}

/// A dead humongous object is reclaimed whole
///
/// **Bug this finds:** Continuation regions leaked after the start region dies
/// **Invariant verified:** No humongous regions remain after GC
#[test]
fn test_dead_humongous_object_is_reclaimed() {
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");
    let region = fixture.region_bytes();

    let mark = m.handle_mark();
    m.alloc_prim_array(3 * region).unwrap();
    m.release_handles(mark);
    m.system_gc().unwrap();

    let heap = fixture.runtime.state().heap();
    assert!(heap.regions().iter().all(|r| !r.is_humongous()));
    assert!(heap.used() < region, "humongous regions were not returned");
}

// ============================================================================
// ALLOCATION FAILURE
// ============================================================================

/// Garbage alone never causes OutOfMemory
///
/// **Bug this finds:** Allocation failure not waking the control thread
/// **Invariant verified:** Churning 4x the heap completes with GCs in between
#[test]
fn test_garbage_churn_triggers_gc_not_oom() {
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");

    churn(&m, 4 * fixture.config.max_heap_size, 4096);

    let stats = fixture.runtime.state().stats();
    assert!(stats.cycles(CycleKind::Full) >= 1, "churn must have needed a GC");
    assert_eq!(stats.cycles(CycleKind::Concurrent), 0, "passive never runs concurrent");
}

/// Live data beyond the heap size ends in OutOfMemory after Full GC
///
/// **Bug this finds:** Infinite retry loop, OOM reported before a Full GC ran
/// **Invariant verified:** OOM only after at least one Full GC; heap usable after release
#[test]
fn test_out_of_memory_after_full_gc() {
    // Arrange: a holder that keeps every chunk alive
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");
    let mark = m.handle_mark();
    let holder = m.alloc_ref_array(64).unwrap();

    // Act
    let mut result = Ok(());
    for i in 0..64 {
        match m.alloc_prim_array(32 * 1024) {
            Ok(chunk) => m.store_ref(holder, i, Some(chunk)).unwrap(),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    // Assert
    match result {
        Err(SgcError::OutOfMemory { requested, .. }) => {
            assert_eq!(requested, (3 + 4096) * 8);
        }
        other => panic!("expected OutOfMemory, got {:?}", other),
    }
    let state = fixture.runtime.state();
    assert!(state.stats().cycles(CycleKind::Full) >= 1, "OOM before any Full GC");

    // Dropping the holder makes the heap usable again
    m.release_handles(mark);
    m.system_gc().unwrap();
    assert!(m.alloc_prim_array(32 * 1024).is_ok());
}
