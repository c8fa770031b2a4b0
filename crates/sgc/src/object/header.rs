//! Object Header - Metadata for collector-managed objects
//!
//! Object Header Layout (3 words):
//! ┌─────────────────────────────────────────┐
//! │  Mark Word                              │  word 0, swapped by CAS
//! │   0            -> Normal                │
//! │   bit63 | n    -> Filler(n words)       │
//! │   otherwise    -> Forwarded(raw ref)    │
//! ├─────────────────────────────────────────┤
//! │  Klass Word                             │  word 1
//! │   bits 0-31  : class id                 │
//! │   bits 32-39 : object kind              │
//! ├─────────────────────────────────────────┤
//! │  Shape Word                             │  word 2
//! │   bits 0-31  : reference slots          │
//! │   bits 32-63 : primitive words          │
//! └─────────────────────────────────────────┘
//!
//! Reference slots follow the header, then primitive words.

use super::{ClassId, ObjRef};

/// Header size in words
pub const HEADER_WORDS: usize = 3;

pub const MARK_WORD: usize = 0;
pub const KLASS_WORD: usize = 1;
pub const SHAPE_WORD: usize = 2;

const FILLER_BIT: u64 = 1 << 63;
const KIND_SHIFT: u32 = 32;
const KIND_MASK: u64 = 0xff;

/// Decoded mark word
///
/// `Forwarded` is the brooks-style redirect: once installed, the canonical
/// copy of the object is the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkWord {
    Normal,
    Forwarded(ObjRef),
    Filler(usize),
}

impl MarkWord {
    #[inline]
    pub fn encode(self) -> u64 {
        match self {
            MarkWord::Normal => 0,
            MarkWord::Forwarded(target) => target.raw(),
            MarkWord::Filler(words) => FILLER_BIT | words as u64,
        }
    }

    #[inline]
    pub fn decode(raw: u64) -> Self {
        if raw == 0 {
            MarkWord::Normal
        } else if raw & FILLER_BIT != 0 {
            MarkWord::Filler((raw & !FILLER_BIT) as usize)
        } else {
            MarkWord::Forwarded(ObjRef::from_raw(raw))
        }
    }

    #[inline]
    pub fn forwardee(self) -> Option<ObjRef> {
        match self {
            MarkWord::Forwarded(target) => Some(target),
            _ => None,
        }
    }

    #[inline]
    pub fn is_filler(self) -> bool {
        matches!(self, MarkWord::Filler(_))
    }
}

/// Object kind stored in the klass word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjKind {
    Instance = 1,
    RefArray = 2,
    PrimArray = 3,
    /// `java.lang.Class` instance; primitive word 0 holds the mirrored class id
    Mirror = 4,
    /// Class loader object; primitive word 0 holds the loader id
    Loader = 5,
}

impl ObjKind {
    fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            1 => Some(ObjKind::Instance),
            2 => Some(ObjKind::RefArray),
            3 => Some(ObjKind::PrimArray),
            4 => Some(ObjKind::Mirror),
            5 => Some(ObjKind::Loader),
            _ => None,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(self, ObjKind::RefArray | ObjKind::PrimArray)
    }
}

/// Class and kind of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Klass {
    pub class: ClassId,
    pub kind: ObjKind,
}

impl Klass {
    pub fn new(class: ClassId, kind: ObjKind) -> Self {
        Self { class, kind }
    }

    #[inline]
    pub fn encode(self) -> u64 {
        self.class.0 as u64 | (self.kind as u64) << KIND_SHIFT
    }

    /// Returns None for words that are not a valid klass
    #[inline]
    pub fn decode(raw: u64) -> Option<Self> {
        let kind = ObjKind::from_bits((raw >> KIND_SHIFT) & KIND_MASK)?;
        if raw >> (KIND_SHIFT + 8) != 0 {
            return None;
        }
        Some(Self {
            class: ClassId(raw as u32),
            kind,
        })
    }
}

/// Reference and primitive payload counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shape {
    pub refs: u32,
    pub prims: u32,
}

impl Shape {
    pub fn new(refs: usize, prims: usize) -> Self {
        Self {
            refs: refs as u32,
            prims: prims as u32,
        }
    }

    #[inline]
    pub fn encode(self) -> u64 {
        self.refs as u64 | (self.prims as u64) << 32
    }

    #[inline]
    pub fn decode(raw: u64) -> Self {
        Self {
            refs: raw as u32,
            prims: (raw >> 32) as u32,
        }
    }

    /// Object size in words including the header
    #[inline]
    pub fn size_words(self) -> usize {
        HEADER_WORDS + self.refs as usize + self.prims as usize
    }
}
