//! Runtime Module - Collector Runtime Integration
//!
//! The runtime-side pieces the collector works with, and the [`Runtime`]
//! facade that owns a heap and its control thread.
//! Manages:
//! - Mutator attach/detach and safepoints
//! - Class loaders, classes and mirrors
//! - Global handles and the interned string table
//! - Allocation pacing

pub mod classes;
pub mod globals;
pub mod mutator;
pub mod pacer;
pub mod safepoint;
pub mod string_table;
pub mod threads;

pub use classes::{ClassLayout, ClassRegistry, ClassUnloadListener, UnloadedLoader};
pub use globals::{GlobalHandle, GlobalHandles};
pub use mutator::{Handle, HandleMark, Mutator};
pub use pacer::Pacer;
pub use safepoint::Safepoint;
pub use string_table::StringTable;
pub use threads::{ThreadRegistry, ThreadState};

use crate::config::GcConfig;
use crate::error::{Result, SgcError};
use crate::gc::{Breakpoints, GcCause, HeapState};
use crate::heuristics;
use crate::stats::GcSummary;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Runtime lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    Stopped,
}

/// Runtime - a heap plus the control thread collecting it
///
/// Dropping the runtime shuts it down; attached mutators must be dropped
/// first.
pub struct Runtime {
    state: Arc<HeapState>,

    /// Control thread, taken on shutdown
    control: Mutex<Option<JoinHandle<()>>>,

    lifecycle: Mutex<RuntimeState>,
}

impl Runtime {
    /// Create the heap and start the control thread
    ///
    /// Heuristics ergonomics are applied to `config` before it is validated.
    ///
    /// # Errors
    /// `Configuration` or `HeapInitialization` for a bad configuration
    pub fn new(mut config: GcConfig) -> Result<Self> {
        heuristics::apply_ergonomics(&mut config);
        let state = Arc::new(HeapState::new(config)?);

        let control_state = Arc::clone(&state);
        let control = std::thread::Builder::new()
            .name("sgc-control".to_string())
            .spawn(move || control_state.control.run(&control_state))
            .map_err(|e| SgcError::Internal(format!("failed to spawn control thread: {}", e)))?;

        Ok(Self {
            state,
            control: Mutex::new(Some(control)),
            lifecycle: Mutex::new(RuntimeState::Running),
        })
    }

    /// Attach the calling thread as a mutator
    ///
    /// # Errors
    /// `ShuttingDown` after [`Runtime::shutdown`]
    pub fn attach(&self, name: &str) -> Result<Mutator> {
        if *self.lifecycle.lock() == RuntimeState::Stopped {
            return Err(SgcError::ShuttingDown);
        }
        Ok(Mutator::attach(Arc::clone(&self.state), name))
    }

    /// Request a GC for `cause` and wait for it
    ///
    /// Must not be called from an attached thread; mutators use
    /// [`Mutator::system_gc`].
    pub fn request_gc(&self, cause: GcCause) -> Result<()> {
        self.state.control.request_explicit(&self.state, cause)
    }

    /// Ask the control thread for a concurrent cycle
    pub fn request_concurrent_cycle(&self) {
        self.state.control.request_concurrent();
    }

    /// Concurrent phase breakpoints, for tests
    pub fn breakpoints(&self) -> &Breakpoints {
        &self.state.breakpoints
    }

    /// Called with every loader unloaded by class unloading
    pub fn add_class_unload_listener(&self, listener: ClassUnloadListener) {
        self.state.classes.add_listener(listener);
    }

    /// GCs of any kind completed so far
    pub fn gcs_completed(&self) -> u64 {
        self.state.control.gcs_completed()
    }

    pub fn summary(&self) -> GcSummary {
        self.state
            .stats
            .summary(self.state.heap.used(), self.state.heap.max_capacity())
    }

    /// Human-readable report: phase times, cycle counters and barrier counts
    pub fn stats_report(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.state.stats.phase_report());
        out.push('\n');
        out.push_str(&self.state.policy.gc_stats_report());
        out.push('\n');
        out.push_str(&self.state.barrier_stats.report());
        out
    }

    /// Collector state, for inspection
    pub fn state(&self) -> &Arc<HeapState> {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == RuntimeState::Running
    }

    /// Stop the control thread and release every waiter
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == RuntimeState::Stopped {
            return;
        }
        *lifecycle = RuntimeState::Stopped;
        drop(lifecycle);

        self.state.control.request_shutdown(&self.state);
        if let Some(control) = self.control.lock().take() {
            if control.join().is_err() {
                log::error!(target: "sgc", "Control thread panicked");
            }
        }
        log::info!(target: "sgc", "Runtime stopped after {} GC cycles", self.state.cycle());
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
