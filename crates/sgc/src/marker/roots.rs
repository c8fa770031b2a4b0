//! Root Scanning - GC Root Identification
//!
//! Roots are starting points for marking and the slots every relocating
//! phase must update.
//!
//! # Root Types
//!
//! 1. **Thread roots** - each mutator's handle stack
//! 2. **Global roots** - global (native) handles
//! 3. **Class roots** - loader holders and class mirrors
//! 4. **Weak roots** - the interned string table, never marked through
//!
//! # Thread Safety
//!
//! Scanning only happens inside a pause. Slots are visited mutably so the
//! same walk serves marking (read) and reference updating (write).

use crate::object::ObjRef;
use crate::runtime::classes::ClassRegistry;
use crate::runtime::globals::GlobalHandles;
use crate::runtime::string_table::StringTable;
use crate::runtime::threads::ThreadRegistry;
use std::fmt;

/// Root types for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootType {
    Thread,
    Global,
    Class,
    WeakString,
}

impl fmt::Display for RootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootType::Thread => write!(f, "Thread"),
            RootType::Global => write!(f, "Global"),
            RootType::Class => write!(f, "Class"),
            RootType::WeakString => write!(f, "WeakString"),
        }
    }
}

/// Which roots a scan visits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootScope {
    /// Strong roots for marking. With unloading, only boot-loader class
    /// roots are strong; other loaders live through marking.
    Marking { unload_classes: bool },
    /// Every root including weak ones, for reference updating
    All,
}

/// Per-type counts of the last scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootCounts {
    pub thread: usize,
    pub global: usize,
    pub class: usize,
    pub weak_string: usize,
}

impl RootCounts {
    pub fn total(&self) -> usize {
        self.thread + self.global + self.class + self.weak_string
    }
}

/// RootScanner - walks the runtime's root sets
pub struct RootScanner<'a> {
    threads: &'a ThreadRegistry,
    globals: &'a GlobalHandles,
    classes: &'a ClassRegistry,
    strings: &'a StringTable,
}

impl<'a> RootScanner<'a> {
    pub fn new(
        threads: &'a ThreadRegistry,
        globals: &'a GlobalHandles,
        classes: &'a ClassRegistry,
        strings: &'a StringTable,
    ) -> Self {
        Self {
            threads,
            globals,
            classes,
            strings,
        }
    }

    /// Visit every non-null root slot in `scope`
    ///
    /// The visitor may rewrite the slot. Must run inside a pause.
    pub fn scan(&self, scope: RootScope, visitor: &mut dyn FnMut(RootType, &mut ObjRef)) -> RootCounts {
        let mut counts = RootCounts::default();

        for thread in self.threads.snapshot() {
            let mut handles = thread.handles.lock();
            for slot in handles.iter_mut().filter(|s| !s.is_null()) {
                visitor(RootType::Thread, slot);
                counts.thread += 1;
            }
        }

        self.globals.oops_do(|slot| {
            if !slot.is_null() {
                visitor(RootType::Global, slot);
                counts.global += 1;
            }
        });

        let boot_only = match scope {
            RootScope::Marking { unload_classes } => unload_classes,
            RootScope::All => false,
        };
        self.classes.oops_do(boot_only, |slot| {
            visitor(RootType::Class, slot);
            counts.class += 1;
        });

        if scope == RootScope::All {
            self.strings.oops_do(|slot| {
                if !slot.is_null() {
                    visitor(RootType::WeakString, slot);
                    counts.weak_string += 1;
                }
            });
        }

        log::trace!(
            target: "sgc",
            "Scanned {:?} roots: {} thread, {} global, {} class, {} weak",
            scope,
            counts.thread,
            counts.global,
            counts.class,
            counts.weak_string
        );
        counts
    }

    /// Visit root slots without caring about their type
    pub fn oops_do<F: FnMut(&mut ObjRef)>(&self, scope: RootScope, mut f: F) -> RootCounts {
        self.scan(scope, &mut |_, slot| f(slot))
    }
}
