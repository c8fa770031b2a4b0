//! GC Heuristics Tests - Mode Selection and Explicit GC Routing
//!
//! These tests verify, through a running control thread, that:
//! - Each heuristics mode runs the cycle kinds it promises
//! - Explicit GC follows ExplicitGCInvokesConcurrent and DisableExplicitGC
//! - Mode ergonomics adjust only flags the user left at default
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC POLICY BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{wait_until, RuntimeFixture};
use sgc::{CycleKind, GcCause, HeuristicsMode};

// ============================================================================
// MODES
// ============================================================================

/// Passive mode turns a concurrent request into a Full GC
///
/// **Bug this finds:** Passive mode starting a concurrent cycle
/// **Invariant verified:** No concurrent cycles in passive mode
#[test]
fn test_passive_mode_never_runs_concurrent() {
    let fixture = RuntimeFixture::passive();

    fixture.runtime.request_concurrent_cycle();
    wait_until(|| fixture.gcs_completed() >= 1, "requested GC should run");

    let stats = fixture.runtime.state().stats();
    assert_eq!(stats.cycles(CycleKind::Concurrent), 0);
    assert_eq!(stats.cycles(CycleKind::Full), 1);
}

/// Aggressive mode keeps the collector busy without any request
///
/// **Bug this finds:** Heuristics trigger not consulted by the control loop
/// **Invariant verified:** Back-to-back concurrent cycles
#[test]
fn test_aggressive_mode_runs_back_to_back() {
    let fixture = RuntimeFixture::aggressive();

    wait_until(
        || fixture.runtime.state().stats().cycles(CycleKind::Concurrent) >= 3,
        "aggressive mode should start cycles on its own",
    );

    assert_eq!(fixture.runtime.state().stats().cycles(CycleKind::Full), 0);
}

/// Static mode stays idle on an empty heap
///
/// **Bug this finds:** Spurious triggers
/// **Invariant verified:** No GC without allocation pressure or request
#[test]
fn test_static_mode_idle_on_empty_heap() {
    let fixture = RuntimeFixture::concurrent();

    std::thread::sleep(std::time::Duration::from_millis(100));

    assert_eq!(fixture.gcs_completed(), 0);
    assert_eq!(fixture.runtime.state().stats().total_cycles(), 0);
}

// ============================================================================
// EXPLICIT GC
// ============================================================================

/// System.gc() runs a Full GC by default
///
/// **Bug this finds:** Explicit GC routed to the wrong cycle kind
/// **Invariant verified:** Explicit GC -> Full unless asked otherwise
#[test]
fn test_explicit_gc_runs_full_by_default() {
    let fixture = RuntimeFixture::concurrent();

    fixture.runtime.request_gc(GcCause::SystemGc).unwrap();

    let state = fixture.runtime.state();
    assert_eq!(state.policy().explicit_full(), 1);
    assert_eq!(state.stats().cycles(CycleKind::Full), 1);
}

/// ExplicitGCInvokesConcurrent turns System.gc() into a concurrent cycle
///
/// **Bug this finds:** Flag ignored by the control loop
/// **Invariant verified:** Explicit GC -> concurrent when the mode allows it
#[test]
fn test_explicit_gc_invokes_concurrent() {
    let fixture = RuntimeFixture::with_options(&[
        "-XX:ShenandoahGCHeuristics=static",
        "-XX:+ExplicitGCInvokesConcurrent",
    ]);
    let m = fixture.attach("main");

    m.system_gc().unwrap();

    let state = fixture.runtime.state();
    assert_eq!(state.policy().explicit_concurrent(), 1);
    assert_eq!(state.stats().cycles(CycleKind::Concurrent), 1);
    assert_eq!(state.stats().cycles(CycleKind::Full), 0);
}

/// DisableExplicitGC makes System.gc() a no-op
///
/// **Bug this finds:** Explicit requests still reaching the control thread
/// **Invariant verified:** No GC ran
#[test]
fn test_disable_explicit_gc() {
    let fixture = RuntimeFixture::with_options(&[
        "-XX:ShenandoahGCHeuristics=passive",
        "-XX:+DisableExplicitGC",
    ]);
    let m = fixture.attach("main");

    m.system_gc().unwrap();

    assert_eq!(fixture.gcs_completed(), 0);
}

// ============================================================================
// ERGONOMICS
// ============================================================================

/// Compact mode lowers the allocation threshold it left at default
///
/// **Bug this finds:** Ergonomics not applied at runtime creation
/// **Invariant verified:** Mode defaults applied
#[test]
fn test_compact_ergonomics_applied() {
    let fixture = RuntimeFixture::with_options(&["-XX:ShenandoahGCHeuristics=compact"]);

    let config = fixture.runtime.state().config();
    assert_eq!(config.heuristics, HeuristicsMode::Compact);
    assert_eq!(config.allocation_threshold, 10);
}

/// Ergonomics never override a flag the user set
///
/// **Bug this finds:** Ergonomics clobbering explicit options
/// **Invariant verified:** Explicit value wins
#[test]
fn test_explicit_flag_beats_ergonomics() {
    let fixture = RuntimeFixture::with_options(&[
        "-XX:ShenandoahGCHeuristics=compact",
        "-XX:+UnlockExperimentalVMOptions",
        "-XX:ShenandoahAllocationThreshold=30",
    ]);

    assert_eq!(fixture.runtime.state().config().allocation_threshold, 30);
}
