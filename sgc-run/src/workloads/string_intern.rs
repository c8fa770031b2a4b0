//! String intern cleanup: unbounded interning under a small heap.
//!
//! Every iteration interns a new unique string and keeps it in a ring of
//! `window` slots. Strings that fall out of the ring are only referenced
//! by the string table, which must drop them for the program to finish.

use super::{arg_or, at_most, Workload, WorkloadContext};
use crate::error::{Result, RunError};

pub const DEFAULT_COUNT: u64 = 5_000_000;
pub const DEFAULT_WINDOW: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringIntern {
    pub count: u64,
    pub window: usize,
}

impl StringIntern {
    /// `string-intern [count] [window]`
    pub fn from_args(args: &[String]) -> Result<Self> {
        at_most("string-intern", args, 2)?;
        let window = arg_or(args, 1, "window", DEFAULT_WINDOW)?;
        if window == 0 {
            return Err(RunError::Usage("window must be at least 1".to_string()));
        }
        Ok(Self {
            count: arg_or(args, 0, "count", DEFAULT_COUNT)?,
            window,
        })
    }
}

impl Workload for StringIntern {
    fn name(&self) -> &'static str {
        "string-intern"
    }

    fn run(&self, ctx: &mut WorkloadContext<'_>) -> Result<()> {
        let m = ctx.runtime.attach("main")?;
        let reachable = m.alloc_ref_array(self.window)?;

        let mut index = 0;
        for c in 0..self.count {
            let mark = m.handle_mark();
            let s = m.intern(&format!("LargeInternedString{}", c))?;
            m.store_ref(reachable, index, Some(s))?;
            m.release_handles(mark);

            index += 1;
            if index >= self.window {
                index = 0;
            }
        }

        tracing::debug!(
            "Interned {} strings, {} left in the table",
            self.count,
            ctx.runtime.state().strings().len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let w = StringIntern::from_args(&[]).unwrap();
        assert_eq!(w.count, 5_000_000);
        assert_eq!(w.window, 1_000);
    }
}
