//! Sieve: a window of objects that appear and disappear at random.
//!
//! The program walks a fixed-size array over and over. A slot holding an
//! object is checked against its index and then dropped with probability
//! 0.9; an empty slot gets a new object with probability 0.5. Each object
//! carries a small payload array, so the heap sees steady churn around a
//! long-lived, randomly thinned working set.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sgc::{ClassLayout, LoaderId};

use super::{arg_or, at_most, Workload, WorkloadContext};
use crate::error::{Result, RunError};

pub const DEFAULT_COUNT: u64 = 100_000_000;
pub const DEFAULT_WINDOW: usize = 1_000_000;

/// Payload bytes per object by default
pub const DEFAULT_PAYLOAD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sieve {
    pub count: u64,
    pub window: usize,
    pub payload: usize,
}

impl Sieve {
    /// `sieve [count] [window] [payload-bytes]`
    pub fn from_args(args: &[String]) -> Result<Self> {
        at_most("sieve", args, 3)?;
        let window = arg_or(args, 1, "window", DEFAULT_WINDOW)?;
        if window == 0 {
            return Err(RunError::Usage("window must be at least 1".to_string()));
        }
        Ok(Self {
            count: arg_or(args, 0, "count", DEFAULT_COUNT)?,
            window,
            payload: arg_or(args, 2, "payload-bytes", DEFAULT_PAYLOAD)?,
        })
    }
}

impl Workload for Sieve {
    fn name(&self) -> &'static str {
        "sieve"
    }

    fn run(&self, ctx: &mut WorkloadContext<'_>) -> Result<()> {
        let m = ctx.runtime.attach("main")?;
        // MyObject { payload: byte[], x: long }
        let class = m.define_class(LoaderId::BOOT, "SieveObjects$MyObject", ClassLayout::new(1, 1))?;
        let arr = m.alloc_ref_array(self.window)?;
        let mut rng = StdRng::seed_from_u64(ctx.seed);

        let mut index = 0;
        for _ in 0..self.count {
            let mark = m.handle_mark();
            match m.load_ref(arr, index)? {
                Some(v) => {
                    let x = m.load_word(v, 0)?;
                    if x != index as u64 {
                        return Err(RunError::Corrupted { index, value: x });
                    }
                    if rng.gen_range(0..1000) > 100 {
                        m.store_ref(arr, index, None)?;
                    }
                }
                None => {
                    if rng.gen_range(0..1000) > 500 {
                        let obj = m.alloc_instance(class)?;
                        m.store_word(obj, 0, index as u64)?;
                        let payload = m.alloc_prim_array(self.payload)?;
                        m.store_ref(obj, 0, Some(payload))?;
                        m.store_ref(arr, index, Some(obj))?;
                    }
                }
            }
            m.release_handles(mark);

            index += 1;
            if index >= self.window {
                index = 0;
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
        let w = Sieve::from_args(&[]).unwrap();
        assert_eq!(w.count, DEFAULT_COUNT);
        assert_eq!(w.window, DEFAULT_WINDOW);
        assert_eq!(w.payload, DEFAULT_PAYLOAD);
    }

    #[test]
    fn test_empty_window_rejected() {
        let args = vec!["10".to_string(), "0".to_string()];
        assert!(Sieve::from_args(&args).is_err());
    }
}
