//! String Table - Weak Table of Interned Strings
//!
//! Maps string contents to the canonical string object. Entries are weak:
//! marking never traces through the table, and entries whose string died
//! are unlinked once marking completes. After relocation the entries are
//! updated like any other root.
//!
//! The table never allocates; `intern` looks up, allocates outside the
//! lock, then inserts with [`StringTable::insert_if_absent`] so a racing
//! interner's string wins.

use crate::object::ObjRef;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct StringTable {
    entries: Mutex<IndexMap<String, ObjRef>>,
    unlinked: AtomicUsize,
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            unlinked: AtomicUsize::new(0),
        }
    }

    pub fn lookup(&self, value: &str) -> Option<ObjRef> {
        self.entries.lock().get(value).copied()
    }

    /// Insert `obj` for `value` unless an entry exists
    ///
    /// # Returns
    /// The canonical string: the existing entry or `obj`
    pub fn insert_if_absent(&self, value: &str, obj: ObjRef) -> ObjRef {
        *self
            .entries
            .lock()
            .entry(value.to_string())
            .or_insert(obj)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries removed by `unlink_dead`
    pub fn unlinked(&self) -> usize {
        self.unlinked.load(Ordering::Relaxed)
    }

    /// Drop entries whose string is not alive
    pub fn unlink_dead<F: FnMut(ObjRef) -> bool>(&self, mut is_alive: F) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, obj| is_alive(*obj));
        let removed = before - entries.len();
        self.unlinked.fetch_add(removed, Ordering::Relaxed);
        removed
    }

    /// Visit every entry slot; only call inside a pause
    pub fn oops_do<F: FnMut(&mut ObjRef)>(&self, mut f: F) {
        for obj in self.entries.lock().values_mut() {
            f(obj);
        }
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_wins() {
        let table = StringTable::new();
        let a = ObjRef::from_addr(10);
        let b = ObjRef::from_addr(20);
        assert_eq!(table.insert_if_absent("x", a), a);
        assert_eq!(table.insert_if_absent("x", b), a);
        assert_eq!(table.lookup("x"), Some(a));
        assert_eq!(table.lookup("y"), None);
    }

    #[test]
    fn test_unlink_dead_entries() {
        let table = StringTable::new();
        table.insert_if_absent("live", ObjRef::from_addr(10));
        table.insert_if_absent("dead", ObjRef::from_addr(20));
        let removed = table.unlink_dead(|obj| obj == ObjRef::from_addr(10));
        assert_eq!(removed, 1);
        assert_eq!(table.len(), 1);
        assert!(table.lookup("dead").is_none());
        assert_eq!(table.unlinked(), 1);
    }
}
