//! Global Handles - Strong Roots Not Tied to a Thread
//!
//! A slab of reference slots with a free list. Slots are roots until
//! dropped; the collector updates them in place when objects move.

use crate::error::{Result, SgcError};
use crate::object::ObjRef;
use parking_lot::Mutex;

/// Index of a global root slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalHandle(pub(crate) u32);

#[derive(Default)]
struct Slots {
    slots: Vec<Option<ObjRef>>,
    free: Vec<u32>,
}

/// Global handle table
#[derive(Default)]
pub struct GlobalHandles {
    inner: Mutex<Slots>,
}

impl GlobalHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, obj: ObjRef) -> GlobalHandle {
        let mut inner = self.inner.lock();
        match inner.free.pop() {
            Some(idx) => {
                inner.slots[idx as usize] = Some(obj);
                GlobalHandle(idx)
            }
            None => {
                inner.slots.push(Some(obj));
                GlobalHandle(inner.slots.len() as u32 - 1)
            }
        }
    }

    pub fn get(&self, handle: GlobalHandle) -> Result<ObjRef> {
        self.inner
            .lock()
            .slots
            .get(handle.0 as usize)
            .copied()
            .flatten()
            .ok_or_else(|| SgcError::InvalidArgument(format!("stale global handle {}", handle.0)))
    }

    pub fn set(&self, handle: GlobalHandle, obj: ObjRef) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.slots.get_mut(handle.0 as usize) {
            Some(slot) if slot.is_some() => {
                *slot = Some(obj);
                Ok(())
            }
            _ => Err(SgcError::InvalidArgument(format!(
                "stale global handle {}",
                handle.0
            ))),
        }
    }

    pub fn destroy(&self, handle: GlobalHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.slots.get_mut(handle.0 as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                inner.free.push(handle.0);
                Ok(())
            }
            _ => Err(SgcError::InvalidArgument(format!(
                "stale global handle {}",
                handle.0
            ))),
        }
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.inner.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every live slot; only call inside a pause
    pub fn oops_do<F: FnMut(&mut ObjRef)>(&self, mut f: F) {
        for slot in self.inner.lock().slots.iter_mut().flatten() {
            f(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_reuse() {
        let globals = GlobalHandles::new();
        let a = globals.create(ObjRef::from_addr(10));
        let b = globals.create(ObjRef::from_addr(20));
        globals.destroy(a).unwrap();
        assert!(globals.get(a).is_err());
        let c = globals.create(ObjRef::from_addr(30));
        assert_eq!(c, a, "freed slot is reused");
        assert_eq!(globals.get(b).unwrap(), ObjRef::from_addr(20));
        assert_eq!(globals.len(), 2);
    }

    #[test]
    fn test_oops_do_updates_in_place() {
        let globals = GlobalHandles::new();
        let h = globals.create(ObjRef::from_addr(10));
        globals.oops_do(|slot| *slot = ObjRef::from_addr(99));
        assert_eq!(globals.get(h).unwrap(), ObjRef::from_addr(99));
    }
}
