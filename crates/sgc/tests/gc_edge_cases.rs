//! GC Edge Case Tests - Pinning, Weak Roots, Globals and Shutdown
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC EDGE CASE BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{assert_list_intact, build_list, churn, RuntimeFixture};
use sgc::{GcCause, SgcError};

fn pinned_regions(fixture: &RuntimeFixture) -> usize {
    fixture
        .runtime
        .state()
        .heap()
        .regions()
        .iter()
        .filter(|r| r.is_pinned())
        .count()
}

// ============================================================================
// PINNING
// ============================================================================

/// A pinned region stays pinned and keeps its contents across Full GC
///
/// **Bug this finds:** Compaction sliding objects out of a pinned region
/// **Invariant verified:** Pin survives GC; unpin makes the region movable again
#[test]
fn test_pinned_object_survives_full_gc() {
    // Arrange
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");
    let obj = m.alloc_prim_array(64).unwrap();
    m.store_word(obj, 5, 55).unwrap();
    m.pin(obj).unwrap();
    churn(&m, 2 * fixture.region_bytes(), 512);

    // Act
    m.system_gc().unwrap();

    // Assert
    assert_eq!(pinned_regions(&fixture), 1);
    assert_eq!(m.load_word(obj, 5).unwrap(), 55);
    m.unpin(obj).unwrap();
    assert_eq!(pinned_regions(&fixture), 0);
    m.system_gc().unwrap();
    assert_eq!(m.load_word(obj, 5).unwrap(), 55);
}

/// Concurrent cycles leave pinned regions out of the collection set
///
/// **Bug this finds:** Evacuating a pinned region
/// **Invariant verified:** Pinned region still pinned after two concurrent cycles
#[test]
fn test_pinned_region_not_evacuated() {
    let fixture = RuntimeFixture::concurrent();
    let m = fixture.attach("main");
    let list = build_list(&m, 50);
    let obj = m.alloc_prim_array(64).unwrap();
    m.store_word(obj, 0, 7).unwrap();
    m.pin(obj).unwrap();
    churn(&m, 4 * fixture.region_bytes(), 512);

    fixture.run_concurrent_cycle(&m);
    fixture.run_concurrent_cycle(&m);

    assert_eq!(pinned_regions(&fixture), 1);
    assert_eq!(m.load_word(obj, 0).unwrap(), 7);
    assert_list_intact(&m, list, 50);
    m.unpin(obj).unwrap();
}

// ============================================================================
// INTERNED STRINGS
// ============================================================================

/// Interning returns the same object before and after a GC moves it
///
/// **Bug this finds:** String table slots not updated after compaction or evacuation
/// **Invariant verified:** One canonical object per value
#[test]
fn test_interned_string_is_canonical_across_gc() {
    // Arrange
    let fixture = RuntimeFixture::concurrent();
    let m = fixture.attach("main");
    churn(&m, fixture.region_bytes(), 256);
    let first = m.intern("hello").unwrap();
    churn(&m, 2 * fixture.region_bytes(), 256);

    // Act
    fixture.run_concurrent_cycle(&m);
    m.system_gc().unwrap();

    // Assert
    let again = m.intern("hello").unwrap();
    assert!(m.same_object(Some(first), Some(again)).unwrap());
    assert_eq!(m.string_value(again).unwrap(), "hello");
    assert_eq!(fixture.runtime.state().strings().len(), 1);
}

/// An interned string nobody references is dropped from the table
///
/// **Bug this finds:** String table treated as a strong root
/// **Invariant verified:** Dead entries unlinked, live ones kept
#[test]
fn test_dead_interned_string_is_unlinked() {
    // Arrange
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");
    let kept = m.intern("kept").unwrap();
    let mark = m.handle_mark();
    m.intern("temporary").unwrap();
    m.release_handles(mark);

    // Act
    m.system_gc().unwrap();

    // Assert
    let strings = fixture.runtime.state().strings();
    assert_eq!(strings.len(), 1);
    assert_eq!(strings.unlinked(), 1);
    assert_eq!(m.string_value(kept).unwrap(), "kept");
}

// ============================================================================
// GLOBAL HANDLES
// ============================================================================

/// A global handle is a strong root that follows its object
///
/// **Bug this finds:** Global slots skipped by root scanning or update refs
/// **Invariant verified:** Global survives cycles after every local is gone
#[test]
fn test_global_handle_roots_object() {
    let fixture = RuntimeFixture::concurrent();
    let m = fixture.attach("main");
    let mark = m.handle_mark();
    let list = build_list(&m, 40);
    let global = m.new_global(Some(list)).unwrap();
    m.release_handles(mark);
    churn(&m, 3 * fixture.region_bytes(), 512);

    fixture.run_concurrent_cycle(&m);
    m.system_gc().unwrap();

    let list = m.global(global).unwrap().expect("global keeps the list");
    assert_list_intact(&m, list, 40);
}

/// A dropped global can no longer be read
///
/// **Bug this finds:** Use of recycled global slots
/// **Invariant verified:** Reading a dropped global is an error
#[test]
fn test_dropped_global_is_rejected() {
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");
    let obj = m.alloc_prim_array(8).unwrap();
    let global = m.new_global(Some(obj)).unwrap();

    m.drop_global(global).unwrap();

    assert!(m.global(global).is_err());
    assert!(m.drop_global(global).is_err());
}

// ============================================================================
// SHUTDOWN
// ============================================================================

/// After shutdown nothing new can attach or request GC
///
/// **Bug this finds:** Requests hanging forever on a stopped control thread
/// **Invariant verified:** ShuttingDown returned promptly
#[test]
fn test_requests_after_shutdown_fail() {
    let fixture = RuntimeFixture::passive();

    fixture.runtime.shutdown();

    assert!(!fixture.runtime.is_running());
    assert!(matches!(fixture.runtime.attach("late"), Err(SgcError::ShuttingDown)));
    assert!(matches!(
        fixture.runtime.request_gc(GcCause::SystemGc),
        Err(SgcError::ShuttingDown)
    ));
}

/// Shutdown is idempotent and safe with a mutator still attached
///
/// **Bug this finds:** Double join, deadlock on detach after shutdown
/// **Invariant verified:** Second shutdown is a no-op
#[test]
fn test_shutdown_twice_with_attached_mutator() {
    let fixture = RuntimeFixture::passive();
    let m = fixture.attach("main");
    let obj = m.alloc_prim_array(8).unwrap();

    fixture.runtime.shutdown();
    fixture.runtime.shutdown();

    assert_eq!(m.load_word(obj, 0).unwrap(), 0);
    drop(m);
    assert!(!fixture.runtime.is_running());
}
