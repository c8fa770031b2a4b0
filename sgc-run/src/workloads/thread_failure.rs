//! Thread failure: worker threads die of OutOfMemoryError, main survives.
//!
//! Workers are started and joined one at a time. Each keeps every array it
//! allocates reachable until the heap is exhausted, reports the uncaught
//! error the way a JVM would and dies. Its data becomes garbage with it, so
//! the next worker and the main thread can still allocate.

use std::io::Write;
use std::thread;

use sgc::Runtime;

use super::{arg_or, at_most, Workload, WorkloadContext};
use crate::error::{Result, RunError};

pub const DEFAULT_THREADS: usize = 16;

/// Elements per array by default
pub const DEFAULT_ARRAY_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadFailure {
    pub threads: usize,
    pub array_len: usize,
}

impl ThreadFailure {
    /// `thread-failure [threads] [array-len]`
    pub fn from_args(args: &[String]) -> Result<Self> {
        at_most("thread-failure", args, 2)?;
        let array_len = arg_or(args, 1, "array-len", DEFAULT_ARRAY_LEN)?;
        if array_len == 0 {
            return Err(RunError::Usage("array-len must be at least 1".to_string()));
        }
        Ok(Self {
            threads: arg_or(args, 0, "threads", DEFAULT_THREADS)?,
            array_len,
        })
    }
}

/// Allocate arrays chained through slot 0 until allocation fails
fn nasty_thread(runtime: &Runtime, name: &str, array_len: usize) -> Result<()> {
    let m = runtime.attach(name)?;
    let root = m.alloc_ref_array(1)?;
    loop {
        let mark = m.handle_mark();
        let array = m.alloc_ref_array(array_len)?;
        let previous = m.load_ref(root, 0)?;
        m.store_ref(array, 0, previous)?;
        m.store_ref(root, 0, Some(array))?;
        m.release_handles(mark);
    }
}

impl Workload for ThreadFailure {
    fn name(&self) -> &'static str {
        "thread-failure"
    }

    fn run(&self, ctx: &mut WorkloadContext<'_>) -> Result<()> {
        let runtime = ctx.runtime;
        for t in 0..self.threads {
            let name = format!("Thread-{}", t);
            let array_len = self.array_len;
            let outcome = thread::scope(|s| {
                let worker = thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(s, || nasty_thread(runtime, &name, array_len))
                    .map_err(|e| RunError::ThreadStart(e.to_string()))?;
                worker
                    .join()
                    .map_err(|_| RunError::ThreadStart(format!("{} panicked", name)))
            })?;

            if let Err(e) = outcome {
                if !e.is_out_of_memory() {
                    return Err(e);
                }
                writeln!(ctx.err, "Exception in thread \"{}\" {}", name, e.java_exception())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let w = ThreadFailure::from_args(&[]).unwrap();
        assert_eq!(w.threads, 16);
        assert_eq!(w.array_len, 1024);
    }

    #[test]
    fn test_zero_length_arrays_rejected() {
        let args = vec!["2".to_string(), "0".to_string()];
        assert!(matches!(ThreadFailure::from_args(&args), Err(RunError::Usage(_))));
    }
}
