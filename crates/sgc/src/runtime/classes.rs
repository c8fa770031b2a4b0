//! Class Registry - Loaders, Classes and Class Unloading
//!
//! Each class loader has a [`ClassLoaderData`] (CLD): the loader's holder
//! object, the mirrors of the classes it defined, and a claim epoch.
//!
//! ## Liveness
//!
//! With class unloading enabled for a cycle, only the boot loader's CLD is
//! a strong root. Marking claims a CLD for the current epoch when it
//! reaches:
//! - an object whose class the loader defined,
//! - a mirror of such a class,
//! - the loader object itself.
//!
//! A claimed CLD pushes its holder and mirrors. After marking, every CLD
//! not claimed in this epoch is unloaded and listeners are notified.
//! Without unloading, all CLDs are strong roots.

use crate::error::{Result, SgcError};
use crate::object::{ClassId, LoaderId, ObjRef};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Field layout of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassLayout {
    /// Reference fields of each instance
    pub ref_fields: usize,
    /// Primitive words of each instance
    pub prim_words: usize,
    /// Static reference fields, stored in the mirror
    pub static_refs: usize,
    /// Static primitive words, stored in the mirror
    pub static_prims: usize,
}

impl ClassLayout {
    pub fn new(ref_fields: usize, prim_words: usize) -> Self {
        Self {
            ref_fields,
            prim_words,
            ..Default::default()
        }
    }

    pub fn with_statics(mut self, static_refs: usize, static_prims: usize) -> Self {
        self.static_refs = static_refs;
        self.static_prims = static_prims;
        self
    }
}

/// Metadata of a defined class
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: ClassId,
    pub name: String,
    pub loader: LoaderId,
    pub layout: ClassLayout,
    mirror_slot: Option<usize>,
}

/// Per-loader metadata
pub struct ClassLoaderData {
    pub id: LoaderId,
    pub name: String,
    holder: ObjRef,
    handles: Vec<ObjRef>,
    classes: Vec<ClassId>,
    claimed_epoch: AtomicU64,
}

impl ClassLoaderData {
    fn new(id: LoaderId, name: String, holder: ObjRef, epoch: u64) -> Self {
        Self {
            id,
            name,
            holder,
            handles: Vec::new(),
            classes: Vec::new(),
            claimed_epoch: AtomicU64::new(epoch),
        }
    }

    pub fn holder(&self) -> ObjRef {
        self.holder
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Claim for `epoch`; true only for the first claimer
    fn try_claim(&self, epoch: u64) -> bool {
        self.claimed_epoch.swap(epoch, Ordering::AcqRel) != epoch
    }

    fn is_claimed(&self, epoch: u64) -> bool {
        self.claimed_epoch.load(Ordering::Acquire) == epoch
    }
}

/// A loader reclaimed by class unloading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadedLoader {
    pub loader: LoaderId,
    pub name: String,
    pub classes: Vec<(ClassId, String)>,
}

/// Callback notified for every unloaded loader
pub type ClassUnloadListener = Box<dyn Fn(&UnloadedLoader) + Send + Sync>;

struct Registry {
    loaders: IndexMap<LoaderId, ClassLoaderData>,
    classes: IndexMap<ClassId, ClassInfo>,
    next_loader: u32,
    next_class: u32,
}

pub struct ClassRegistry {
    inner: RwLock<Registry>,
    listeners: Mutex<Vec<ClassUnloadListener>>,
    unloaded_loaders: AtomicUsize,
    unloaded_classes: AtomicUsize,
}

impl ClassRegistry {
    /// Registry with the boot loader and its builtin classes
    pub fn new() -> Self {
        let mut loaders = IndexMap::new();
        loaders.insert(
            LoaderId::BOOT,
            ClassLoaderData::new(LoaderId::BOOT, "boot".to_string(), ObjRef::NULL, 0),
        );
        let mut registry = Registry {
            loaders,
            classes: IndexMap::new(),
            next_loader: 1,
            next_class: 0,
        };

        for (name, layout) in [
            ("java.lang.Object", ClassLayout::default()),
            ("[Ljava.lang.Object;", ClassLayout::default()),
            ("[B", ClassLayout::default()),
            ("java.lang.String", ClassLayout::default()),
            ("java.lang.Class", ClassLayout::default()),
            ("java.lang.ClassLoader", ClassLayout::default()),
        ] {
            registry.define(LoaderId::BOOT, name, layout);
        }
        debug_assert_eq!(registry.next_class, ClassId::BUILTIN_COUNT);

        Self {
            inner: RwLock::new(registry),
            listeners: Mutex::new(Vec::new()),
            unloaded_loaders: AtomicUsize::new(0),
            unloaded_classes: AtomicUsize::new(0),
        }
    }

    /// Register a loader whose holder object is `holder`
    ///
    /// New loaders count as claimed in `epoch`, so a loader created during
    /// marking survives the cycle.
    pub fn register_loader(&self, name: &str, holder: ObjRef, epoch: u64) -> LoaderId {
        let mut inner = self.inner.write();
        let id = LoaderId(inner.next_loader);
        inner.next_loader += 1;
        inner
            .loaders
            .insert(id, ClassLoaderData::new(id, name.to_string(), holder, epoch));
        id
    }

    /// Loader id reserved by the next `register_loader` call
    pub fn next_loader_id(&self) -> LoaderId {
        LoaderId(self.inner.read().next_loader)
    }

    pub fn define_class(&self, loader: LoaderId, name: &str, layout: ClassLayout) -> Result<ClassId> {
        let mut inner = self.inner.write();
        if !inner.loaders.contains_key(&loader) {
            return Err(SgcError::InvalidArgument(format!(
                "class loader {} is not live",
                loader.0
            )));
        }
        Ok(inner.define(loader, name, layout))
    }

    /// Record the mirror object of `class` in its loader's handles
    pub fn attach_mirror(&self, class: ClassId, mirror: ObjRef) -> Result<()> {
        let mut inner = self.inner.write();
        let loader = inner.info(class)?.loader;
        let cld = inner
            .loaders
            .get_mut(&loader)
            .ok_or(SgcError::ClassUnloaded(class.0))?;
        cld.handles.push(mirror);
        let slot = cld.handles.len() - 1;
        if let Some(info) = inner.classes.get_mut(&class) {
            info.mirror_slot = Some(slot);
        }
        Ok(())
    }

    pub fn class_info(&self, class: ClassId) -> Result<ClassInfo> {
        self.inner.read().info(class).cloned()
    }

    pub fn loader_of(&self, class: ClassId) -> Result<LoaderId> {
        Ok(self.inner.read().info(class)?.loader)
    }

    pub fn layout(&self, class: ClassId) -> Result<ClassLayout> {
        Ok(self.inner.read().info(class)?.layout)
    }

    pub fn mirror_of(&self, class: ClassId) -> Result<ObjRef> {
        let inner = self.inner.read();
        let info = inner.info(class)?;
        let slot = info.mirror_slot.ok_or_else(|| {
            SgcError::InvalidState {
                expected: "class with mirror".to_string(),
                actual: format!("class {} has no mirror yet", info.name),
            }
        })?;
        inner
            .loaders
            .get(&info.loader)
            .and_then(|cld| cld.handles.get(slot).copied())
            .ok_or(SgcError::ClassUnloaded(class.0))
    }

    pub fn holder_of(&self, loader: LoaderId) -> Option<ObjRef> {
        self.inner.read().loaders.get(&loader).map(|cld| cld.holder)
    }

    pub fn is_loader_alive(&self, loader: LoaderId) -> bool {
        self.inner.read().loaders.contains_key(&loader)
    }

    pub fn loader_count(&self) -> usize {
        self.inner.read().loaders.len()
    }

    pub fn class_count(&self) -> usize {
        self.inner.read().classes.len()
    }

    pub fn unloaded_loaders(&self) -> usize {
        self.unloaded_loaders.load(Ordering::Relaxed)
    }

    pub fn unloaded_classes(&self) -> usize {
        self.unloaded_classes.load(Ordering::Relaxed)
    }

    // === Marking support ===

    /// Claim `loader` for `epoch`
    ///
    /// # Returns
    /// The holder and mirrors to push when this call made the claim; `None`
    /// if already claimed, unknown, or the boot loader (always a root).
    pub fn claim_loader(&self, loader: LoaderId, epoch: u64) -> Option<Vec<ObjRef>> {
        if loader == LoaderId::BOOT {
            return None;
        }
        let inner = self.inner.read();
        let cld = inner.loaders.get(&loader)?;
        if !cld.try_claim(epoch) {
            return None;
        }
        let mut refs = Vec::with_capacity(cld.handles.len() + 1);
        if !cld.holder.is_null() {
            refs.push(cld.holder);
        }
        refs.extend(cld.handles.iter().copied().filter(|h| !h.is_null()));
        Some(refs)
    }

    /// Claim the loader that defined `class`
    pub fn claim_class(&self, class: ClassId, epoch: u64) -> Option<Vec<ObjRef>> {
        let loader = self.inner.read().classes.get(&class)?.loader;
        self.claim_loader(loader, epoch)
    }

    /// Visit CLD root slots; only call inside a pause
    ///
    /// With `boot_only`, other loaders are skipped (they are kept alive by
    /// marking instead).
    pub fn oops_do<F: FnMut(&mut ObjRef)>(&self, boot_only: bool, mut f: F) {
        let mut inner = self.inner.write();
        for cld in inner.loaders.values_mut() {
            if boot_only && cld.id != LoaderId::BOOT {
                continue;
            }
            if !cld.holder.is_null() {
                f(&mut cld.holder);
            }
            for h in cld.handles.iter_mut().filter(|h| !h.is_null()) {
                f(h);
            }
        }
    }

    /// Remove every loader not claimed in `epoch`
    pub fn unload(&self, epoch: u64) -> Vec<UnloadedLoader> {
        let mut inner = self.inner.write();
        let dead: Vec<LoaderId> = inner
            .loaders
            .values()
            .filter(|cld| cld.id != LoaderId::BOOT && !cld.is_claimed(epoch))
            .map(|cld| cld.id)
            .collect();

        let mut unloaded = Vec::with_capacity(dead.len());
        for id in dead {
            if let Some(cld) = inner.loaders.shift_remove(&id) {
                let classes: Vec<(ClassId, String)> = cld
                    .classes
                    .iter()
                    .filter_map(|c| inner.classes.shift_remove(c).map(|info| (*c, info.name)))
                    .collect();
                self.unloaded_classes
                    .fetch_add(classes.len(), Ordering::Relaxed);
                unloaded.push(UnloadedLoader {
                    loader: id,
                    name: cld.name,
                    classes,
                });
            }
        }
        self.unloaded_loaders
            .fetch_add(unloaded.len(), Ordering::Relaxed);
        unloaded
    }

    pub fn add_listener(&self, listener: ClassUnloadListener) {
        self.listeners.lock().push(listener);
    }

    pub fn notify_unloaded(&self, unloaded: &[UnloadedLoader]) {
        let listeners = self.listeners.lock();
        for loader in unloaded {
            for listener in listeners.iter() {
                listener(loader);
            }
        }
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    fn define(&mut self, loader: LoaderId, name: &str, layout: ClassLayout) -> ClassId {
        let id = ClassId(self.next_class);
        self.next_class += 1;
        self.classes.insert(
            id,
            ClassInfo {
                id,
                name: name.to_string(),
                loader,
                layout,
                mirror_slot: None,
            },
        );
        if let Some(cld) = self.loaders.get_mut(&loader) {
            cld.classes.push(id);
        }
        id
    }

    fn info(&self, class: ClassId) -> Result<&ClassInfo> {
        match self.classes.get(&class) {
            Some(info) => Ok(info),
            None if class.0 < self.next_class => Err(SgcError::ClassUnloaded(class.0)),
            None => Err(SgcError::InvalidArgument(format!(
                "class {} was never defined",
                class.0
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_classes() {
        let registry = ClassRegistry::new();
        assert_eq!(registry.class_count(), ClassId::BUILTIN_COUNT as usize);
        assert_eq!(
            registry.class_info(ClassId::STRING).unwrap().name,
            "java.lang.String"
        );
        assert!(matches!(
            registry.class_info(ClassId(99)),
            Err(SgcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_claim_once_per_epoch() {
        let registry = ClassRegistry::new();
        let loader = registry.register_loader("app", ObjRef::from_addr(40), 0);
        let class = registry
            .define_class(loader, "Leak", ClassLayout::new(1, 0))
            .unwrap();
        registry.attach_mirror(class, ObjRef::from_addr(80)).unwrap();

        let refs = registry.claim_class(class, 1).unwrap();
        assert_eq!(refs, vec![ObjRef::from_addr(40), ObjRef::from_addr(80)]);
        assert!(registry.claim_loader(loader, 1).is_none());
        assert!(registry.claim_loader(loader, 2).is_some());
        assert!(registry.claim_loader(LoaderId::BOOT, 3).is_none());
    }

    #[test]
    fn test_unload_unclaimed() {
        let registry = ClassRegistry::new();
        let live = registry.register_loader("live", ObjRef::from_addr(40), 0);
        let dead = registry.register_loader("dead", ObjRef::from_addr(48), 0);
        let dead_class = registry
            .define_class(dead, "Gone", ClassLayout::default())
            .unwrap();

        registry.claim_loader(live, 1);
        let unloaded = registry.unload(1);
        assert_eq!(unloaded.len(), 1);
        assert_eq!(unloaded[0].loader, dead);
        assert_eq!(unloaded[0].classes, vec![(dead_class, "Gone".to_string())]);
        assert!(matches!(
            registry.class_info(dead_class),
            Err(SgcError::ClassUnloaded(_))
        ));
        assert!(registry.is_loader_alive(live));
        assert!(registry.define_class(dead, "Again", ClassLayout::default()).is_err());
    }

    #[test]
    fn test_new_loader_survives_current_epoch() {
        let registry = ClassRegistry::new();
        registry.register_loader("fresh", ObjRef::from_addr(40), 5);
        assert!(registry.unload(5).is_empty());
        assert_eq!(registry.unload(6).len(), 1);
    }

    #[test]
    fn test_listener_notified() {
        let registry = ClassRegistry::new();
        let seen = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&seen);
        registry.add_listener(Box::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        registry.register_loader("a", ObjRef::from_addr(40), 0);
        let unloaded = registry.unload(1);
        registry.notify_unloaded(&unloaded);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
