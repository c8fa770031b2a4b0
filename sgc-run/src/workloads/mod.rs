//! Workloads the launcher can run against the collector.
//!
//! Each workload is a small program written against the mutator API, sized
//! by positional arguments with production defaults. A workload returns
//! `Ok` when the program ran to completion; the launcher then prints
//! `All good`.

pub mod class_loader_leak;
pub mod hello;
pub mod sieve;
pub mod string_intern;
pub mod thread_failure;

use std::io::Write;
use std::str::FromStr;

use clap::ValueEnum;
use sgc::Runtime;

use crate::error::{Result, RunError};

pub use class_loader_leak::ClassLoaderLeak;
pub use hello::Hello;
pub use sieve::Sieve;
pub use string_intern::StringIntern;
pub use thread_failure::ThreadFailure;

/// Everything a running workload may touch
pub struct WorkloadContext<'a> {
    /// The collector runtime; workloads attach their own mutators
    pub runtime: &'a Runtime,
    /// Program standard output
    pub out: &'a mut dyn Write,
    /// Program standard error
    pub err: &'a mut dyn Write,
    /// Seed for workloads that draw random numbers
    pub seed: u64,
}

/// A program run by the launcher.
pub trait Workload {
    /// Name used on the command line
    fn name(&self) -> &'static str;

    /// Run to completion
    ///
    /// # Errors
    /// An error escaping `run` is an uncaught exception in the main thread
    fn run(&self, ctx: &mut WorkloadContext<'_>) -> Result<()>;
}

/// Workloads selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkloadKind {
    /// Print a greeting and exit
    Hello,
    /// Load classes in fresh loaders, each holding a large static array
    ClassLoaderLeak,
    /// Worker threads run out of memory while the main thread survives
    ThreadFailure,
    /// Retain a random window of objects and check them on every visit
    Sieve,
    /// Intern unique strings, keeping a sliding window reachable
    StringIntern,
}

impl WorkloadKind {
    /// Build the workload from its positional arguments
    pub fn build(self, args: &[String]) -> Result<Box<dyn Workload>> {
        Ok(match self {
            WorkloadKind::Hello => {
                no_args("hello", args)?;
                Box::new(Hello)
            }
            WorkloadKind::ClassLoaderLeak => Box::new(ClassLoaderLeak::from_args(args)?),
            WorkloadKind::ThreadFailure => Box::new(ThreadFailure::from_args(args)?),
            WorkloadKind::Sieve => Box::new(Sieve::from_args(args)?),
            WorkloadKind::StringIntern => Box::new(StringIntern::from_args(args)?),
        })
    }

    /// Is `name` one of the workload names?
    pub fn is_name(name: &str) -> bool {
        <WorkloadKind as ValueEnum>::from_str(name, false).is_ok()
    }
}

/// Positional argument `index`, or `default` when absent
pub(crate) fn arg_or<T: FromStr>(args: &[String], index: usize, name: &str, default: T) -> Result<T> {
    match args.get(index) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| RunError::Usage(format!("{} must be a number, got '{}'", name, raw))),
    }
}

/// Reject arguments past `max`
pub(crate) fn at_most(workload: &str, args: &[String], max: usize) -> Result<()> {
    if args.len() > max {
        return Err(RunError::Usage(format!(
            "{} takes at most {} arguments, got {}",
            workload,
            max,
            args.len()
        )));
    }
    Ok(())
}

fn no_args(workload: &str, args: &[String]) -> Result<()> {
    at_most(workload, args, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_workload_names() {
        assert!(WorkloadKind::is_name("hello"));
        assert!(WorkloadKind::is_name("class-loader-leak"));
        assert!(WorkloadKind::is_name("string-intern"));
        assert!(!WorkloadKind::is_name("-Xmx16m"));
        assert!(!WorkloadKind::is_name("unknown"));
    }

    #[test]
    fn test_arg_or_default_and_parse() {
        let a = args(&["12"]);
        assert_eq!(arg_or(&a, 0, "count", 5usize).unwrap(), 12);
        assert_eq!(arg_or(&a, 1, "size", 5usize).unwrap(), 5);

        let bad = args(&["many"]);
        assert!(matches!(arg_or(&bad, 0, "count", 1usize), Err(RunError::Usage(_))));
    }

    #[test]
    fn test_hello_rejects_arguments() {
        assert!(WorkloadKind::Hello.build(&[]).is_ok());
        assert!(WorkloadKind::Hello.build(&args(&["x"])).is_err());
    }

    #[test]
    fn test_build_names_match() {
        for kind in WorkloadKind::value_variants() {
            let workload = kind.build(&[]).unwrap();
            let name = kind.to_possible_value().unwrap();
            assert_eq!(workload.name(), name.get_name());
        }
    }
}
