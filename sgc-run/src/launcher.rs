//! Launcher - Runtime Lifecycle Around One Workload
//!
//! ```text
//! options ──► GcConfig ──► Runtime ──► workload ──► "All good" / exception
//!   (SGC_OPTS first,          │                         │
//!    then command line)       └──── stats at exit ◄─────┘
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use sgc::{GcConfig, GcSummary, Runtime};

use crate::error::{Result, RunError, EXIT_SUCCESS};
use crate::workloads::{WorkloadContext, WorkloadKind};

/// What to run and how
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// JVM-style options, applied after `SGC_OPTS`
    pub vm_options: Vec<String>,
    pub workload: WorkloadKind,
    pub args: Vec<String>,
    /// Write a [`StatsReport`] here at exit
    pub stats_json: Option<PathBuf>,
    /// Read `SGC_*` variables before applying `vm_options`
    pub use_env: bool,
}

impl LaunchOptions {
    pub fn new(workload: WorkloadKind) -> Self {
        Self {
            vm_options: Vec::new(),
            workload,
            args: Vec::new(),
            stats_json: None,
            use_env: true,
        }
    }

    pub fn with_vm_options<S: AsRef<str>>(mut self, options: &[S]) -> Self {
        self.vm_options = options.iter().map(|o| o.as_ref().to_string()).collect();
        self
    }

    pub fn with_args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.args = args.iter().map(|a| a.as_ref().to_string()).collect();
        self
    }
}

/// JSON written by `--stats-json`
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub workload: String,
    pub heuristics: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
    pub cpus: usize,
    pub loaders_unloaded: usize,
    pub classes_unloaded: usize,
    pub summary: GcSummary,
}

/// Runs one workload in a fresh runtime
pub struct Launcher {
    options: LaunchOptions,
}

impl Launcher {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }

    /// Resolve the collector configuration
    ///
    /// # Errors
    /// `RunError::Options` for unknown, locked or malformed options
    pub fn config(&self) -> Result<GcConfig> {
        let mut config = if self.options.use_env {
            GcConfig::from_env()?
        } else {
            GcConfig::default()
        };
        config.apply_vm_options(&self.options.vm_options)?;
        config.validate()?;
        Ok(config)
    }

    /// Run the workload, writing program output to `out` and `err`
    ///
    /// # Returns
    /// The process exit code
    pub fn run(&self, out: &mut dyn Write, err: &mut dyn Write) -> i32 {
        match self.try_run(out, err) {
            Ok(code) => code,
            Err(e) => {
                if e.is_usage() {
                    let _ = writeln!(err, "Error: {}", e);
                    let _ = writeln!(err, "Error: Could not create the Java Virtual Machine.");
                } else {
                    let _ = writeln!(err, "Error: {}", e);
                }
                e.exit_code()
            }
        }
    }

    fn try_run(&self, out: &mut dyn Write, err: &mut dyn Write) -> Result<i32> {
        let config = self.config()?;
        let workload = self.options.workload.build(&self.options.args)?;
        let print_stats = config.print_gc_details || config.verbose;
        let seed = config.random_seed;

        tracing::info!(
            workload = workload.name(),
            heuristics = config.heuristics.name(),
            max_heap = config.max_heap_size,
            "Starting workload"
        );
        let runtime = Runtime::new(config)?;
        let start = Instant::now();

        let result = {
            let mut ctx = WorkloadContext {
                runtime: &runtime,
                out: &mut *out,
                err: &mut *err,
                seed,
            };
            workload.run(&mut ctx)
        };

        let exit_code = match result {
            Ok(()) => {
                writeln!(out, "All good")?;
                EXIT_SUCCESS
            }
            Err(e) if e.is_usage() => {
                runtime.shutdown();
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Workload failed");
                writeln!(err, "Exception in thread \"main\" {}", e.java_exception())?;
                e.exit_code()
            }
        };
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        if print_stats {
            write!(out, "{}", runtime.stats_report())?;
        }
        if let Some(path) = &self.options.stats_json {
            let report = self.stats_report(&runtime, exit_code, elapsed_ms);
            let file = std::fs::File::create(path)?;
            serde_json::to_writer_pretty(file, &report)?;
        }

        runtime.shutdown();
        tracing::info!(exit_code, elapsed_ms, "Workload finished");
        Ok(exit_code)
    }

    fn stats_report(&self, runtime: &Runtime, exit_code: i32, elapsed_ms: u64) -> StatsReport {
        let state = runtime.state();
        StatsReport {
            workload: format!("{:?}", self.options.workload),
            heuristics: state.config().heuristics.name().to_string(),
            exit_code,
            elapsed_ms,
            cpus: num_cpus::get(),
            loaders_unloaded: state.classes().unloaded_loaders(),
            classes_unloaded: state.classes().unloaded_classes(),
            summary: runtime.summary(),
        }
    }
}

/// Run `options` with output captured
///
/// # Returns
/// `(exit code, stdout, stderr)`
pub fn run_captured(options: LaunchOptions) -> (i32, String, String) {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let code = Launcher::new(options).run(&mut out, &mut err);
    (
        code,
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    )
}
