//! Command-line surface of the launcher.
//!
//! JVM-style options (`-Xmx128m`, `-XX:+Flag`, `-verbose:gc`) do not fit
//! clap's grammar, so they are split off before clap sees the arguments:
//!
//! ```text
//! sgc --stats-json out.json -Xmx16m -XX:+UnlockDiagnosticVMOptions hello
//!     └──── launcher ──────┘└────────── VM options ────────────┘└ workload
//! ```
//!
//! Everything after the workload name belongs to the workload.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::workloads::WorkloadKind;

/// sgc - run collector workloads with JVM-style options
#[derive(Parser, Debug)]
#[command(name = "sgc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run collector workloads with JVM-style -XX options", long_about = None)]
#[command(override_usage = "sgc [OPTIONS] [VM OPTIONS] <WORKLOAD> [ARGS]...")]
#[command(after_help = "VM options: -Xmx<size> -Xms<size> -verbose:gc -XX:+<Flag> -XX:-<Flag> -XX:<Flag>=<value>\n\
                        VM options are also read from SGC_OPTS.")]
pub struct Cli {
    /// Write the GC summary as JSON to this file at exit
    #[arg(long, value_name = "PATH", env = "SGC_STATS_JSON")]
    pub stats_json: Option<PathBuf>,

    /// Log filter for collector diagnostics (e.g. "sgc=debug")
    #[arg(long, value_name = "FILTER", env = "SGC_LOG", default_value = "warn")]
    pub log: String,

    /// Disable color in log output
    #[arg(long, env = "SGC_NO_COLOR")]
    pub no_color: bool,

    /// Workload to run
    #[arg(value_enum)]
    pub workload: WorkloadKind,

    /// Workload arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// VM options split off before parsing
    #[arg(skip)]
    pub vm_options: Vec<String>,
}

impl Cli {
    /// Parse the process arguments
    pub fn parse_env() -> Result<Self, clap::Error> {
        Self::parse_argv(std::env::args_os())
    }

    /// Parse `argv`, the program name first
    pub fn parse_argv<I, T>(argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let argv: Vec<String> = argv
            .into_iter()
            .map(|a| a.into().to_string_lossy().into_owned())
            .collect();
        let (launcher, vm_options) = split_vm_options(argv);
        let mut cli = Self::try_parse_from(launcher)?;
        cli.vm_options = vm_options;
        Ok(cli)
    }
}

/// Is `arg` a JVM-style option?
pub fn is_vm_option(arg: &str) -> bool {
    arg.starts_with("-X") || arg.starts_with("-verbose")
}

/// Split VM options that come before the workload name from the rest
///
/// # Returns
/// `(launcher arguments in order, VM options in order)`
pub fn split_vm_options(argv: Vec<String>) -> (Vec<String>, Vec<String>) {
    let mut launcher = Vec::with_capacity(argv.len());
    let mut vm_options = Vec::new();
    let mut in_workload = false;

    for (i, arg) in argv.into_iter().enumerate() {
        if i > 0 && !in_workload {
            if is_vm_option(&arg) {
                vm_options.push(arg);
                continue;
            }
            in_workload = WorkloadKind::is_name(&arg);
        }
        launcher.push(arg);
    }
    (launcher, vm_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_argv(args.iter().copied()).unwrap()
    }

    #[test]
    fn test_parse_hello() {
        let cli = parse(&["sgc", "hello"]);
        assert_eq!(cli.workload, WorkloadKind::Hello);
        assert!(cli.vm_options.is_empty());
        assert!(cli.args.is_empty());
    }

    #[test]
    fn test_vm_options_split_before_workload() {
        let cli = parse(&[
            "sgc",
            "-Xmx16m",
            "-XX:+UnlockDiagnosticVMOptions",
            "-verbose:gc",
            "thread-failure",
            "4",
            "512",
        ]);
        assert_eq!(
            cli.vm_options,
            vec!["-Xmx16m", "-XX:+UnlockDiagnosticVMOptions", "-verbose:gc"]
        );
        assert_eq!(cli.workload, WorkloadKind::ThreadFailure);
        assert_eq!(cli.args, vec!["4", "512"]);
    }

    #[test]
    fn test_workload_args_are_not_vm_options() {
        let cli = parse(&["sgc", "sieve", "-Xnot-an-option"]);
        assert!(cli.vm_options.is_empty());
        assert_eq!(cli.args, vec!["-Xnot-an-option"]);
    }

    #[test]
    fn test_launcher_options_mix_with_vm_options() {
        let cli = parse(&["sgc", "-Xmx8m", "--stats-json", "out.json", "hello"]);
        assert_eq!(cli.stats_json, Some(PathBuf::from("out.json")));
        assert_eq!(cli.vm_options, vec!["-Xmx8m"]);
    }

    #[test]
    fn test_missing_workload_is_an_error() {
        assert!(Cli::parse_argv(["sgc", "-Xmx8m"]).is_err());
        assert!(Cli::parse_argv(["sgc", "no-such-workload"]).is_err());
    }
}
