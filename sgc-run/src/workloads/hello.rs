//! The trivial program: allocate a string and print it.

use std::io::Write;

use super::{Workload, WorkloadContext};
use crate::error::Result;

pub struct Hello;

impl Workload for Hello {
    fn name(&self) -> &'static str {
        "hello"
    }

    fn run(&self, ctx: &mut WorkloadContext<'_>) -> Result<()> {
        let m = ctx.runtime.attach("main")?;
        let greeting = m.intern("Hello World")?;
        let text = m.string_value(greeting)?;
        writeln!(ctx.out, "{}", text)?;
        Ok(())
    }
}
