//! Object Module - references and object layout
//!
//! Objects live in the heap word array and are addressed by [`ObjRef`], an
//! arena index rather than a native pointer. Raw value 0 is null, any other
//! value is the word address of the object plus one, so zeroed memory reads
//! as null references.

pub mod header;

pub use header::{Klass, MarkWord, ObjKind, Shape, HEADER_WORDS};

use std::fmt;

/// Reference to a heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjRef(u64);

impl ObjRef {
    pub const NULL: ObjRef = ObjRef(0);

    /// Reference to the object starting at word `addr`
    #[inline]
    pub fn from_addr(addr: usize) -> Self {
        ObjRef(addr as u64 + 1)
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        ObjRef(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Word address of the object header; meaningless for null
    #[inline]
    pub fn addr(self) -> usize {
        (self.0 as usize).wrapping_sub(1)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjRef(null)")
        } else {
            write!(f, "ObjRef({:#x})", self.addr())
        }
    }
}

/// Class identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    /// `java.lang.Object`
    pub const OBJECT: ClassId = ClassId(0);
    /// `Object[]`
    pub const OBJECT_ARRAY: ClassId = ClassId(1);
    /// `byte[]`
    pub const BYTE_ARRAY: ClassId = ClassId(2);
    /// `java.lang.String`
    pub const STRING: ClassId = ClassId(3);
    /// `java.lang.Class`
    pub const CLASS: ClassId = ClassId(4);
    /// `java.lang.ClassLoader`
    pub const CLASS_LOADER: ClassId = ClassId(5);

    /// Number of classes defined by the boot loader at startup
    pub const BUILTIN_COUNT: u32 = 6;
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Class loader identifier; 0 is the boot loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(pub u32);

impl LoaderId {
    pub const BOOT: LoaderId = LoaderId(0);
}

/// Number of 8-byte words needed for `bytes`
#[inline]
pub fn words_for_bytes(bytes: usize) -> usize {
    (bytes + 7) / 8
}
