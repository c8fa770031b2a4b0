//! GC Logging and Tracing
//!
//! Every collector event goes two ways:
//! - into the `log` facade, so embedders see it through their own logger;
//! - into the runtime's [`GcLogger`] history, which tests and the launcher
//!   inspect, and which optionally prints to the console (`-verbose:gc`).
//!
//! Log Levels:
//! - ERROR: verification failures
//! - WARN: cancellations, degenerated cycles, Full GC upgrades, allocation failures
//! - INFO: cycle boundaries, class unloading
//! - DEBUG: phases and pauses
//! - TRACE: heap statistics

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// GC event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// GC cycle started
    CycleStart {
        cycle: u64,
        kind: String,
        cause: String,
        mode: String,
    },

    /// Concurrent phase started
    PhaseStart { phase: String, cycle: u64 },

    /// Concurrent phase completed
    PhaseEnd {
        phase: String,
        duration_ms: f64,
        cycle: u64,
    },

    /// Stop-the-world pause completed
    Pause { phase: String, duration_us: u64 },

    /// GC cycle completed
    CycleEnd {
        cycle: u64,
        kind: String,
        duration_ms: f64,
        used_before: usize,
        used_after: usize,
    },

    /// Concurrent cycle cancelled
    Cancelled { cycle: u64, cause: String },

    /// Degenerated cycle started
    Degenerated { cycle: u64, point: String },

    /// Degenerated cycle or request upgraded to Full GC
    UpgradeToFull { cycle: u64, reason: String },

    /// Mutator allocation failed and waits for GC
    AllocationFailure { size: usize, heap_used: usize },

    /// Class loaders reclaimed by class unloading
    ClassUnload { loaders: usize, classes: usize },

    /// Collection set chosen at final mark
    CollectionSet {
        regions: usize,
        garbage: usize,
        live: usize,
        immediate_regions: usize,
        immediate_garbage: usize,
    },

    /// Heap statistics
    HeapStats {
        used_bytes: usize,
        total_bytes: usize,
        utilization: f64,
    },

    /// Heap verification failed
    VerificationFailure { point: String, message: String },
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level kept in history and printed
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,

    /// Maximum events kept in history, oldest dropped first
    pub history: usize,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
            history: 4096,
        }
    }
}

/// GC Logger - event history and console sink for one runtime
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<Vec<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    /// Create new GC logger
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a GC event
    pub fn log(&self, event: GcEvent) {
        let level = Self::event_level(&event);
        log::log!(target: "sgc", log::Level::from(level), "{}", Self::describe(&event));

        if !self.is_enabled() || level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() >= self.config.history.max(1) {
            events.remove(0);
        }
        events.push((Instant::now(), event));
    }

    /// Get log level for event
    pub fn event_level(event: &GcEvent) -> LogLevel {
        match event {
            GcEvent::VerificationFailure { .. } => LogLevel::Error,
            GcEvent::Cancelled { .. }
            | GcEvent::Degenerated { .. }
            | GcEvent::UpgradeToFull { .. }
            | GcEvent::AllocationFailure { .. } => LogLevel::Warn,
            GcEvent::CycleStart { .. }
            | GcEvent::CycleEnd { .. }
            | GcEvent::ClassUnload { .. }
            | GcEvent::CollectionSet { .. } => LogLevel::Info,
            GcEvent::PhaseStart { .. } | GcEvent::PhaseEnd { .. } | GcEvent::Pause { .. } => {
                LogLevel::Debug
            }
            GcEvent::HeapStats { .. } => LogLevel::Trace,
        }
    }

    /// Output to console
    fn output_console(&self, event: &GcEvent) {
        let stamp = if self.config.timestamps {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        } else {
            String::new()
        };

        if self.config.json {
            if let Ok(json) = serde_json::to_string(event) {
                println!("{}{}", stamp, json);
            }
        } else {
            println!("{}[gc] {}", stamp, Self::describe(event));
        }
    }

    /// Human-readable rendering
    pub fn describe(event: &GcEvent) -> String {
        match event {
            GcEvent::CycleStart {
                cycle,
                kind,
                cause,
                mode,
            } => format!("GC({}) {} started ({}, {} heuristics)", cycle, kind, cause, mode),
            GcEvent::PhaseStart { phase, cycle } => format!("GC({}) {}", cycle, phase),
            GcEvent::PhaseEnd {
                phase,
                duration_ms,
                cycle,
            } => format!("GC({}) {} {:.3}ms", cycle, phase, duration_ms),
            GcEvent::Pause { phase, duration_us } => {
                format!("Pause {} {:.3}ms", phase, *duration_us as f64 / 1000.0)
            }
            GcEvent::CycleEnd {
                cycle,
                kind,
                duration_ms,
                used_before,
                used_after,
            } => format!(
                "GC({}) {} {}K->{}K {:.3}ms",
                cycle,
                kind,
                used_before / 1024,
                used_after / 1024,
                duration_ms
            ),
            GcEvent::Cancelled { cycle, cause } => {
                format!("GC({}) Cancelling GC: {}", cycle, cause)
            }
            GcEvent::Degenerated { cycle, point } => {
                format!("GC({}) Pause Degenerated GC ({})", cycle, point)
            }
            GcEvent::UpgradeToFull { cycle, reason } => {
                format!("GC({}) Upgrading to Full GC: {}", cycle, reason)
            }
            GcEvent::AllocationFailure { size, heap_used } => format!(
                "Allocation failure: {} bytes (heap used: {}K)",
                size,
                heap_used / 1024
            ),
            GcEvent::ClassUnload { loaders, classes } => {
                format!("Unloaded {} class loaders, {} classes", loaders, classes)
            }
            GcEvent::CollectionSet {
                regions,
                garbage,
                live,
                immediate_regions,
                immediate_garbage,
            } => format!(
                "Collectable Garbage: {}K, Live: {}K, CSet: {} regions; Immediate Garbage: {}K, {} regions",
                garbage / 1024,
                live / 1024,
                regions,
                immediate_garbage / 1024,
                immediate_regions
            ),
            GcEvent::HeapStats {
                used_bytes,
                total_bytes,
                utilization,
            } => format!(
                "Heap: {}K/{}K ({:.1}% used)",
                used_bytes / 1024,
                total_bytes / 1024,
                utilization * 100.0
            ),
            GcEvent::VerificationFailure { point, message } => {
                format!("Verification failed at {}: {}", point, message)
            }
        }
    }

    /// Get all events
    pub fn get_events(&self) -> Vec<(Instant, GcEvent)> {
        self.events.lock().clone()
    }

    /// Events matching a predicate, without timestamps
    pub fn events_matching(&self, pred: impl Fn(&GcEvent) -> bool) -> Vec<GcEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| pred(e))
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Clear all events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}
