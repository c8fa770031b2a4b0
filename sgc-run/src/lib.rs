//! sgc-run - Workload Launcher for the SGC Collector
//!
//! Runs small mutator programs on an [`sgc::Runtime`] configured with
//! JVM-style options, and reports the outcome the way a JVM would:
//! `All good` on success, an uncaught exception line and exit code 1 on
//! failure, exit code 2 when the options are rejected.
//!
//! ```text
//! sgc -Xmx32m -XX:+UnlockDiagnosticVMOptions -XX:ShenandoahGCHeuristics=passive class-loader-leak
//! ```
//!
//! The workloads are stress programs for specific collector duties:
//!
//! | Workload            | Exercises                                   |
//! |---------------------|---------------------------------------------|
//! | `hello`             | startup and shutdown                        |
//! | `class-loader-leak` | class unloading through loader reachability |
//! | `thread-failure`    | heap recovery after threads die of OOM      |
//! | `sieve`             | random churn around a long-lived window     |
//! | `string-intern`     | weak string table cleanup                   |

pub mod cli;
pub mod error;
pub mod launcher;
pub mod workloads;

pub use cli::Cli;
pub use error::{Result, RunError, EXIT_SUCCESS, EXIT_UNCAUGHT, EXIT_USAGE};
pub use launcher::{run_captured, LaunchOptions, Launcher, StatsReport};
pub use workloads::{Workload, WorkloadContext, WorkloadKind};
