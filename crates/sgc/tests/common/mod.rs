//! Test Utilities for the SGC Test Suite
//!
//! Fixtures build a small heap (16 regions of 64K unless stated otherwise)
//! with the control thread running, so every test exercises the same code
//! paths an application would.
//!
//! ============================================================================
//! Assertions are strict: a test that only passes with a tolerance is a bug.
//! ============================================================================

#![allow(dead_code)]

use sgc::config::KB;
use sgc::{GcConfig, GcPhase, Handle, HeuristicsMode, Mutator, Runtime};
use std::time::Duration;

/// Region size used by the fixtures
pub const REGION_SIZE: usize = 64 * KB;

/// Default heap for tests: 16 regions
pub const DEFAULT_HEAP_SIZE: usize = 16 * REGION_SIZE;

/// How long a test waits for the control thread
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// RUNTIME FIXTURE
// ============================================================================

/// A runtime plus its configuration, shut down on drop
pub struct RuntimeFixture {
    pub runtime: Runtime,
    pub config: GcConfig,
}

impl RuntimeFixture {
    /// Base configuration: small heap, two workers, no pacing delays,
    /// diagnostic and experimental flags unlocked
    pub fn base_config(mode: HeuristicsMode) -> GcConfig {
        GcConfig {
            max_heap_size: DEFAULT_HEAP_SIZE,
            initial_heap_size: DEFAULT_HEAP_SIZE,
            region_size: Some(REGION_SIZE),
            min_tlab_size: KB,
            conc_gc_threads: Some(2),
            parallel_gc_threads: Some(2),
            heuristics: mode,
            pacing: false,
            verify: true,
            unlock_diagnostic: true,
            unlock_experimental: true,
            ..Default::default()
        }
    }

    /// Build a fixture from a full configuration
    ///
    /// **Bug this finds:** Configuration validation bugs, initialization failures
    pub fn with_config(config: GcConfig) -> Self {
        let runtime = Runtime::new(config.clone())
            .unwrap_or_else(|e| panic!("runtime should start with {:?}: {}", config.heuristics, e));
        Self { runtime, config }
    }

    /// Passive mode: every GC is a Full GC
    pub fn passive() -> Self {
        Self::with_config(Self::base_config(HeuristicsMode::Passive))
    }

    /// Static mode: concurrent cycles only when requested or nearly full
    pub fn concurrent() -> Self {
        Self::with_config(Self::base_config(HeuristicsMode::Static))
    }

    /// Aggressive mode: back-to-back cycles evacuating every non-empty region
    pub fn aggressive() -> Self {
        Self::with_config(Self::base_config(HeuristicsMode::Aggressive))
    }

    /// Fixture from `-XX` options on top of the base configuration
    pub fn with_options(options: &[&str]) -> Self {
        let mut config = Self::base_config(HeuristicsMode::Adaptive);
        config
            .apply_vm_options(options)
            .unwrap_or_else(|e| panic!("options {:?} should parse: {}", options, e));
        Self::with_config(config)
    }

    pub fn attach(&self, name: &str) -> Mutator {
        self.runtime
            .attach(name)
            .unwrap_or_else(|e| panic!("attach {} failed: {}", name, e))
    }

    pub fn region_bytes(&self) -> usize {
        self.runtime.state().heap().region_bytes()
    }

    pub fn used(&self) -> usize {
        self.runtime.state().heap().used()
    }

    pub fn gcs_completed(&self) -> u64 {
        self.runtime.gcs_completed()
    }

    /// Request a concurrent cycle and wait until the control thread has
    /// finished at least one more GC
    ///
    /// `m` waits inside a safe region so the cycle's pauses can run.
    pub fn run_concurrent_cycle(&self, m: &Mutator) {
        let before = self.gcs_completed();
        self.runtime.request_concurrent_cycle();
        m.blocking(|| wait_until(|| self.gcs_completed() > before, "concurrent cycle should complete"));
    }

    /// Start a concurrent cycle and park the control thread at `phase`
    pub fn park_at(&self, m: &Mutator, phase: GcPhase) {
        self.runtime.breakpoints().arm(phase);
        self.runtime.request_concurrent_cycle();
        let reached = m.blocking(|| self.runtime.breakpoints().wait_until_reached(phase, TEST_TIMEOUT));
        assert!(reached, "control thread never reached {}", phase);
    }

    /// Let a parked cycle continue and wait for it to finish
    pub fn release_and_finish(&self, m: &Mutator) {
        let before = self.gcs_completed();
        self.runtime.breakpoints().release();
        m.blocking(|| wait_until(|| self.gcs_completed() > before, "parked cycle should complete"));
    }
}

impl Drop for RuntimeFixture {
    fn drop(&mut self) {
        self.runtime.shutdown();
    }
}

// ============================================================================
// OBJECT GRAPH HELPERS
// ============================================================================

/// Build a singly linked list of `len` cells behind a holder array
///
/// holder[0] -> cell, cell[0] = next cell, cell[1] = value array whose
/// word 0 is the cell's position. Cells are prepended, so the handle stack
/// never grows past a few entries.
pub fn build_list(m: &Mutator, len: usize) -> Handle {
    let holder = m.alloc_ref_array(1).expect("list holder");
    for i in (0..len).rev() {
        let mark = m.handle_mark();
        let value = m.alloc_prim_array(8).expect("list value");
        m.store_word(value, 0, i as u64).expect("store value");
        let cell = m.alloc_ref_array(2).expect("list cell");
        m.store_ref(cell, 1, Some(value)).expect("link value");
        let first = m.load_ref(holder, 0).expect("load first");
        m.store_ref(cell, 0, first).expect("link next");
        m.store_ref(holder, 0, Some(cell)).expect("link holder");
        m.release_handles(mark);
    }
    holder
}

/// Walk a list built by [`build_list`] and return the values in order
#[track_caller]
pub fn read_list(m: &Mutator, head: Handle) -> Vec<u64> {
    let mark = m.handle_mark();
    let mut values = Vec::new();
    let mut cur = m.load_ref(head, 0).expect("load first cell");
    while let Some(cell) = cur {
        let node = m
            .load_ref(cell, 1)
            .expect("load value")
            .expect("every cell has a value");
        values.push(m.load_word(node, 0).expect("read value"));
        cur = m.load_ref(cell, 0).expect("load next");
    }
    m.release_handles(mark);
    values
}

/// Allocate `bytes` of unreachable primitive arrays
pub fn churn(m: &Mutator, bytes: usize, chunk: usize) {
    let mark = m.handle_mark();
    let mut done = 0;
    while done < bytes {
        m.alloc_prim_array(chunk).expect("garbage allocation");
        m.release_handles(mark);
        done += chunk;
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Poll `cond` until it holds or the test timeout passes
#[track_caller]
pub fn wait_until(cond: impl Fn() -> bool, message: &str) {
    let deadline = std::time::Instant::now() + TEST_TIMEOUT;
    while !cond() {
        assert!(std::time::Instant::now() < deadline, "timed out: {}", message);
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Assert the list behind `head` holds exactly `0..len`
#[track_caller]
pub fn assert_list_intact(m: &Mutator, head: Handle, len: usize) {
    let values = read_list(m, head);
    let expected: Vec<u64> = (0..len as u64).collect();
    assert_eq!(values, expected, "list corrupted by GC");
}

/// Assert the handle still points at a well-formed object of `words` words
#[track_caller]
pub fn assert_prim_array(m: &Mutator, h: Handle, words: usize) {
    assert_eq!(
        m.array_length(h).expect("array length"),
        words,
        "object shape changed across GC"
    );
}
