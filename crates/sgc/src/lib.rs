//! # SGC - Concurrent Region-Based Garbage Collector
//!
//! SGC is a concurrent, region-based, evacuating collector for a managed
//! runtime. Marking, evacuation and reference updating all run alongside
//! application threads; pauses only scan roots and flip phases.
//!
//! ## Overview
//!
//! - **Region-Based Heap**: equal-sized regions with an explicit state machine
//!   (empty, regular, humongous, cset, pinned, trash)
//! - **SATB Marking**: snapshot-at-the-beginning concurrent marking with a
//!   pre-write barrier and top-at-mark-start per region
//! - **Concurrent Evacuation**: live objects in the collection set are copied
//!   by GC workers and by mutators through the write barrier; racing copies
//!   are settled by a CAS on the forwarding word
//! - **Concurrent Update Refs**: a heap walk rewrites stale references
//! - **Degenerated and Full GC**: a cancelled cycle finishes in one pause, and
//!   a sliding mark-compact is the last resort
//! - **Pluggable Heuristics**: adaptive, static, compact, aggressive, passive
//!
//! ## Quick Start
//!
//! ```rust
//! use sgc::{ClassLayout, GcConfig, LoaderId, Runtime};
//!
//! fn main() -> Result<(), sgc::SgcError> {
//!     let config = GcConfig::from_vm_options(&[
//!         "-Xmx8m",
//!         "-XX:+UnlockDiagnosticVMOptions",
//!         "-XX:ShenandoahGCHeuristics=passive",
//!     ])?;
//!     let runtime = Runtime::new(config)?;
//!     let m = runtime.attach("main")?;
//!
//!     let class = m.define_class(LoaderId::BOOT, "Node", ClassLayout::new(1, 1))?;
//!     let node = m.alloc_instance(class)?;
//!     m.store_word(node, 0, 42)?;
//!
//!     m.system_gc()?;
//!     assert_eq!(m.load_word(node, 0)?, 42);
//!
//!     drop(m);
//!     runtime.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Mutator Threads                        │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐                │
//! │  │  TLAB    │  │  TLAB    │  │  TLAB    │   handles      │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘   SATB buffer  │
//! │       └─────────────┴─────────────┘                      │
//! │          SATB / write / read / CAS / acmp barriers        │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ alloc failure, System.gc()
//! ┌────────────────────────────▼─────────────────────────────┐
//! │                    Control Thread                         │
//! │   heuristics ─▶ concurrent cycle ─▶ degenerated ─▶ full   │
//! │                                                           │
//! │   Init Mark ▸ Conc Mark ▸ Final Mark ▸ Conc Evac ▸        │
//! │   Init UR ▸ Conc Update Refs ▸ Final UR ▸ Cleanup         │
//! │                   (GC worker gangs)                       │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Handles
//!
//! Objects move at any safepoint. Application code never holds a raw
//! reference; it holds [`Handle`]s into its mutator's handle stack, which
//! the collector treats as roots and updates in place.
//!
//! ## Modules
//!
//! - [`allocator`]: allocation requests, TLABs and GCLABs
//! - [`barrier`]: the mutator barrier set
//! - [`config`]: `-XX` style options, validation, environment overrides
//! - [`error`]: error types
//! - [`gc`]: heap state, the control thread and the three cycle kinds
//! - [`heap`]: regions, free set and collection set
//! - [`heuristics`]: when to collect and which regions to evacuate
//! - [`logging`]: GC event log
//! - [`marker`]: mark bitmap, SATB queues, root scanning, marking loop
//! - [`object`]: object header layout
//! - [`relocate`]: evacuation, reference updating, sliding compaction
//! - [`runtime`]: mutators, classes, strings, global handles, safepoints
//! - [`stats`]: cycle statistics and region sampling
//! - [`verifier`]: heap verification at pause boundaries

// Core GC modules
pub mod gc;
pub mod config;
pub mod error;

// Memory management subsystems
pub mod allocator;
pub mod heap;
pub mod object;

// GC algorithm components
pub mod barrier;
pub mod heuristics;
pub mod marker;
pub mod relocate;

// Runtime and monitoring
pub mod logging;
pub mod runtime;
pub mod stats;
pub mod verifier;

// Re-export main types for convenience
pub use config::{GcConfig, HeuristicsMode};
pub use error::{Result, SgcError};
pub use gc::{Breakpoints, GcCause, GcPhase, HeapState};
pub use object::{ClassId, LoaderId};
pub use runtime::{ClassLayout, GlobalHandle, Handle, HandleMark, Mutator, Runtime, UnloadedLoader};
pub use stats::{CycleKind, GcSummary};

/// SGC version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize SGC with default configuration
///
/// # Returns
///
/// - `Ok(Runtime)` - Runtime with its control thread running
/// - `Err(SgcError)` - Initialization failed
pub fn init() -> Result<Runtime> {
    Runtime::new(GcConfig::default())
}

/// Initialize SGC from `-XX` style options
///
/// # Arguments
///
/// * `options` - VM options such as `-Xmx64m` or `-XX:+ShenandoahVerify`
///
/// # Returns
///
/// - `Ok(Runtime)` - Runtime with its control thread running
/// - `Err(SgcError)` - Unknown option, bad value or failed initialization
///
/// # Examples
///
/// ```rust
/// let runtime = sgc::init_with_options(&["-Xmx8m", "-XX:ShenandoahGCHeuristics=compact"])?;
/// runtime.shutdown();
/// # Ok::<(), sgc::SgcError>(())
/// ```
pub fn init_with_options<S: AsRef<str>>(options: &[S]) -> Result<Runtime> {
    let config = GcConfig::from_vm_options(options)?;
    Runtime::new(config)
}
