//! Class loader leak: many short-lived loaders with large statics.
//!
//! Each iteration creates a loader, defines one class in it and stores a
//! large array in the class's static field. Only the last mirror stays
//! reachable, so the program fits the heap only if dead loaders are
//! unloaded. With `-XX:-ClassUnloading` it runs out of memory.

use sgc::{ClassLayout, SgcError};

use super::{arg_or, at_most, Workload, WorkloadContext};
use crate::error::Result;

/// Loaders created by default
pub const DEFAULT_COUNT: usize = 128;

/// Static payload per loader by default, in MB
pub const DEFAULT_PAYLOAD_MB: usize = 4;

const CLASS_NAME: &str = "ClassLoaderLeak$Dummy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLoaderLeak {
    pub count: usize,
    pub payload_bytes: usize,
}

impl Default for ClassLoaderLeak {
    fn default() -> Self {
        Self {
            count: DEFAULT_COUNT,
            payload_bytes: DEFAULT_PAYLOAD_MB * 1024 * 1024,
        }
    }
}

impl ClassLoaderLeak {
    /// `class-loader-leak [count] [payload-mb]`
    pub fn from_args(args: &[String]) -> Result<Self> {
        at_most("class-loader-leak", args, 2)?;
        Ok(Self {
            count: arg_or(args, 0, "count", DEFAULT_COUNT)?,
            payload_bytes: arg_or(args, 1, "payload-mb", DEFAULT_PAYLOAD_MB)? * 1024 * 1024,
        })
    }
}

impl Workload for ClassLoaderLeak {
    fn name(&self) -> &'static str {
        "class-loader-leak"
    }

    fn run(&self, ctx: &mut WorkloadContext<'_>) -> Result<()> {
        let m = ctx.runtime.attach("main")?;
        let sink = m.new_global(None)?;

        for i in 0..self.count {
            let mark = m.handle_mark();
            let (loader, _) = m.new_class_loader(&format!("MyClassLoader-{}", i))?;
            let class = m.define_class(loader, CLASS_NAME, ClassLayout::new(0, 0).with_statics(1, 0))?;

            let info = ctx.runtime.state().classes().class_info(class)?;
            if info.loader != loader {
                return Err(SgcError::InvalidState {
                    expected: format!("class defined by loader {}", loader.0),
                    actual: format!("class defined by loader {}", info.loader.0),
                }
                .into());
            }

            let payload = m.alloc_prim_array(self.payload_bytes)?;
            m.store_static_ref(class, 0, Some(payload))?;
            let mirror = m.mirror_of(class)?;
            m.set_global(sink, Some(mirror))?;
            m.release_handles(mark);
        }

        m.drop_global(sink)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_original_sizes() {
        let w = ClassLoaderLeak::from_args(&[]).unwrap();
        assert_eq!(w, ClassLoaderLeak::default());
        assert_eq!(w.count, 128);
        assert_eq!(w.payload_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_scaled_arguments() {
        let w = ClassLoaderLeak::from_args(&["16".to_string(), "1".to_string()]).unwrap();
        assert_eq!(w.count, 16);
        assert_eq!(w.payload_bytes, 1024 * 1024);
        assert!(ClassLoaderLeak::from_args(&["1".into(), "2".into(), "3".into()]).is_err());
    }
}
