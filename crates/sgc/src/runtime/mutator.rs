//! Mutator - The Application Thread's View of the Heap
//!
//! Every heap access of an application thread goes through a [`Mutator`]:
//! allocation with the retry policy, barriered field access, handles,
//! class loading, string interning and pinning.
//!
//! ## Handles
//!
//! Objects move, so the application never keeps a raw reference across an
//! operation. Each reference handed out is a [`Handle`]: a slot in the
//! thread's handle stack, which is a root set the collector updates in
//! place. A [`HandleMark`] releases every handle created after it.
//!
//! ```text
//!   let mark = m.handle_mark();
//!   let a = m.alloc_instance(class)?;       // handle 7
//!   let b = m.alloc_ref_array(4)?;          // handle 8
//!   m.store_ref(b, 0, Some(a))?;
//!   m.release_handles(mark);                // 7 and 8 are gone
//! ```
//!
//! ## Safepoints
//!
//! Each operation polls the safepoint before touching the heap. Blocking
//! outside the collector must go through [`Mutator::blocking`].

use crate::allocator::AllocRequest;
use crate::barrier;
use crate::error::{Result, SgcError};
use crate::gc::{GcCause, HeapState};
use crate::object::{words_for_bytes, ClassId, Klass, LoaderId, ObjKind, ObjRef, Shape};
use crate::runtime::classes::ClassLayout;
use crate::runtime::globals::GlobalHandle;
use crate::runtime::threads::ThreadState;
use std::sync::Arc;

/// Slot in the owning mutator's handle stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

/// Handle stack depth to return to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleMark(usize);

/// An attached application thread
pub struct Mutator {
    state: Arc<HeapState>,
    thread: Arc<ThreadState>,
}

impl Mutator {
    pub(crate) fn attach(state: Arc<HeapState>, name: &str) -> Self {
        state.safepoint.attach();
        let thread = state.threads.register(name);
        log::debug!(target: "sgc", "Attached mutator {} ({})", thread.id(), name);
        Self { state, thread }
    }

    pub fn name(&self) -> &str {
        self.thread.name()
    }

    /// Bytes allocated by this thread so far
    pub fn allocated_bytes(&self) -> usize {
        self.thread.allocated_bytes()
    }

    // === Safepoints ===

    /// Stop here if a pause is pending
    #[inline]
    pub fn safepoint_poll(&self) {
        self.state.safepoint.poll();
    }

    /// Run `f` inside a safe region
    ///
    /// `f` must not touch the heap: pauses run while it does.
    pub fn blocking<R>(&self, f: impl FnOnce() -> R) -> R {
        self.state.safepoint.enter_safe_region();
        let result = f();
        self.state.safepoint.leave_safe_region();
        result
    }

    /// `System.gc()`: request an explicit GC and wait for it
    pub fn system_gc(&self) -> Result<()> {
        self.safepoint_poll();
        let state = &self.state;
        self.blocking(|| state.control.request_explicit(state, GcCause::SystemGc))
    }

    // === Handles ===

    pub fn handle_mark(&self) -> HandleMark {
        HandleMark(self.thread.handles.lock().len())
    }

    /// Drop every handle created after `mark`
    pub fn release_handles(&self, mark: HandleMark) {
        self.thread.handles.lock().truncate(mark.0);
    }

    pub fn handle_count(&self) -> usize {
        self.thread.handle_count()
    }

    /// Copy a handle, so it can outlive a `HandleMark` taken after it
    pub fn dup(&self, h: Handle) -> Result<Handle> {
        let obj = self.resolve_handle(h)?;
        Ok(self.push_handle(obj))
    }

    fn push_handle(&self, obj: ObjRef) -> Handle {
        let mut handles = self.thread.handles.lock();
        handles.push(obj);
        Handle(handles.len() - 1)
    }

    fn resolve_handle(&self, h: Handle) -> Result<ObjRef> {
        self.thread
            .handles
            .lock()
            .get(h.0)
            .copied()
            .ok_or_else(|| SgcError::InvalidArgument(format!("released handle {}", h.0)))
    }

    /// Non-null object behind `h`
    fn object(&self, h: Handle) -> Result<ObjRef> {
        let obj = self.resolve_handle(h)?;
        if obj.is_null() {
            return Err(SgcError::NullReference);
        }
        Ok(obj)
    }

    fn value(&self, v: Option<Handle>) -> Result<ObjRef> {
        match v {
            Some(h) => self.resolve_handle(h),
            None => Ok(ObjRef::NULL),
        }
    }

    fn wrap(&self, obj: ObjRef) -> Option<Handle> {
        (!obj.is_null()).then(|| self.push_handle(obj))
    }

    // === Allocation ===

    /// Allocate and initialize an object, polling and retrying per policy
    fn allocate(&self, klass: Klass, shape: Shape) -> Result<ObjRef> {
        self.safepoint_poll();
        let words = shape.size_words();
        let addr = self.allocate_memory(words)?;
        let obj = self.state.heap.init_object(addr, klass, shape);
        self.thread.add_allocated(words * 8);
        Ok(obj)
    }

    /// Raw memory for `words`
    ///
    /// Retry policy: keep waiting for GCs while the last GC made progress,
    /// then allow `ShenandoahFullGCThreshold` more attempts so at least one
    /// Full GC ran before giving up.
    fn allocate_memory(&self, words: usize) -> Result<usize> {
        let state = &self.state;
        if state.pacer.needs_pacing(words) {
            self.blocking(|| state.pacer.pace_for_alloc(words));
        } else {
            state.pacer.claim_for_alloc(words, true);
        }

        if let Some(addr) = self.try_allocate(words) {
            return Ok(addr);
        }

        let mut tries = 0;
        while state.progress_last_gc() {
            tries += 1;
            self.wait_for_gc(words)?;
            if let Some(addr) = self.try_allocate(words) {
                return Ok(addr);
            }
        }
        while tries <= state.config.full_gc_threshold {
            tries += 1;
            self.wait_for_gc(words)?;
            if let Some(addr) = self.try_allocate(words) {
                return Ok(addr);
            }
        }

        log::warn!(
            target: "sgc",
            "Out of memory in {}: {} bytes requested after {} GCs",
            self.name(),
            words * 8,
            tries
        );
        Err(SgcError::OutOfMemory {
            requested: words * 8,
            available: state.heap.available(),
        })
    }

    fn try_allocate(&self, words: usize) -> Option<usize> {
        let heap = &self.state.heap;
        if self.state.config.use_tlab {
            if let Some(addr) = self.thread.tlab.lock().allocate_or_refill(heap, words) {
                return Some(addr);
            }
        }
        heap.allocate(&mut AllocRequest::for_shared(words))
    }

    fn wait_for_gc(&self, words: usize) -> Result<()> {
        let state = &self.state;
        self.blocking(|| state.control.handle_alloc_failure(state, words))
    }

    /// Allocate an instance of `class`
    pub fn alloc_instance(&self, class: ClassId) -> Result<Handle> {
        let layout = self.state.classes.layout(class)?;
        let shape = Shape::new(layout.ref_fields, layout.prim_words);
        let obj = self.allocate(Klass::new(class, ObjKind::Instance), shape)?;
        // Above TAMS the instance is never scanned, so it cannot claim its loader
        self.keep_loader_alive(self.state.classes.loader_of(class)?);
        Ok(self.push_handle(obj))
    }

    /// Allocate `Object[len]`, all null
    pub fn alloc_ref_array(&self, len: usize) -> Result<Handle> {
        let klass = Klass::new(ClassId::OBJECT_ARRAY, ObjKind::RefArray);
        let obj = self.allocate(klass, Shape::new(len, 0))?;
        Ok(self.push_handle(obj))
    }

    /// Allocate a primitive array of `bytes`, zeroed
    pub fn alloc_prim_array(&self, bytes: usize) -> Result<Handle> {
        let klass = Klass::new(ClassId::BYTE_ARRAY, ObjKind::PrimArray);
        let obj = self.allocate(klass, Shape::new(0, words_for_bytes(bytes)))?;
        Ok(self.push_handle(obj))
    }

    /// Shallow copy of `h`
    pub fn clone_object(&self, h: Handle) -> Result<Handle> {
        let src = self.object(h)?;
        let heap = &self.state.heap;
        let src = barrier::read_barrier(&self.state, src);
        let klass = heap.klass(src).ok_or_else(|| {
            SgcError::Internal(format!("clone source {:?} has a broken class word", src))
        })?;
        let shape = heap.shape(src);

        let copy = self.allocate(klass, shape)?;
        // Allocation may have moved the source
        let src = barrier::read_barrier(&self.state, self.object(h)?);
        heap.copy_object_body(src.addr(), copy.addr(), shape.size_words());
        barrier::clone_barrier(&self.state, copy);
        Ok(self.push_handle(copy))
    }

    // === Field access ===

    fn check_ref_index(&self, obj: ObjRef, index: usize) -> Result<()> {
        let refs = self.state.heap.shape(obj).refs as usize;
        if index >= refs {
            return Err(SgcError::BoundsCheckFailed { index, length: refs });
        }
        Ok(())
    }

    fn check_prim_index(&self, obj: ObjRef, index: usize) -> Result<()> {
        let prims = self.state.heap.shape(obj).prims as usize;
        if index >= prims {
            return Err(SgcError::BoundsCheckFailed { index, length: prims });
        }
        Ok(())
    }

    /// Read reference field `index` of `h`; `None` for null
    pub fn load_ref(&self, h: Handle, index: usize) -> Result<Option<Handle>> {
        self.safepoint_poll();
        let obj = self.object(h)?;
        self.check_ref_index(obj, index)?;
        let v = barrier::load_ref_field(&self.state, obj, index);
        let v = barrier::read_barrier(&self.state, v);
        Ok(self.wrap(v))
    }

    /// Write reference field `index` of `h`
    pub fn store_ref(&self, h: Handle, index: usize, value: Option<Handle>) -> Result<()> {
        self.safepoint_poll();
        let obj = self.object(h)?;
        self.check_ref_index(obj, index)?;
        let value = self.value(value)?;
        barrier::store_ref_field(&self.state, &self.thread, obj, index, value);
        Ok(())
    }

    /// Compare-and-swap reference field `index` of `h`
    ///
    /// # Returns
    /// True if the field held (a copy of) `expected` and now holds `new`
    pub fn cas_ref(
        &self,
        h: Handle,
        index: usize,
        expected: Option<Handle>,
        new: Option<Handle>,
    ) -> Result<bool> {
        self.safepoint_poll();
        let obj = self.object(h)?;
        self.check_ref_index(obj, index)?;
        let expected = self.value(expected)?;
        let new = self.value(new)?;
        Ok(barrier::cas_ref_field(&self.state, &self.thread, obj, index, expected, new).is_ok())
    }

    /// Reference equality
    pub fn same_object(&self, a: Option<Handle>, b: Option<Handle>) -> Result<bool> {
        let a = self.value(a)?;
        let b = self.value(b)?;
        Ok(barrier::acmp_barrier(&self.state, a, b))
    }

    pub fn is_null(&self, h: Handle) -> Result<bool> {
        Ok(self.resolve_handle(h)?.is_null())
    }

    /// Read primitive word `index` of `h`
    pub fn load_word(&self, h: Handle, index: usize) -> Result<u64> {
        self.safepoint_poll();
        let obj = self.object(h)?;
        self.check_prim_index(obj, index)?;
        Ok(barrier::load_prim_field(&self.state, obj, index))
    }

    /// Write primitive word `index` of `h`
    pub fn store_word(&self, h: Handle, index: usize, value: u64) -> Result<()> {
        self.safepoint_poll();
        let obj = self.object(h)?;
        self.check_prim_index(obj, index)?;
        barrier::store_prim_field(&self.state, &self.thread, obj, index, value);
        Ok(())
    }

    /// Element count: reference slots for `Object[]`, words otherwise
    pub fn array_length(&self, h: Handle) -> Result<usize> {
        let obj = self.object(h)?;
        let heap = &self.state.heap;
        let shape = heap.shape(barrier::read_barrier(&self.state, obj));
        Ok(match heap.klass(obj).map(|k| k.kind) {
            Some(ObjKind::RefArray) => shape.refs as usize,
            _ => shape.prims as usize,
        })
    }

    pub fn class_of(&self, h: Handle) -> Result<ClassId> {
        let obj = self.object(h)?;
        self.state
            .heap
            .klass(obj)
            .map(|k| k.class)
            .ok_or_else(|| SgcError::Internal(format!("{:?} has a broken class word", obj)))
    }

    // === Globals ===

    pub fn new_global(&self, value: Option<Handle>) -> Result<GlobalHandle> {
        let obj = self.value(value)?;
        Ok(self.state.globals.create(obj))
    }

    pub fn global(&self, g: GlobalHandle) -> Result<Option<Handle>> {
        self.safepoint_poll();
        let obj = self.state.globals.get(g)?;
        Ok(self.wrap(barrier::read_barrier(&self.state, obj)))
    }

    pub fn set_global(&self, g: GlobalHandle, value: Option<Handle>) -> Result<()> {
        let obj = self.value(value)?;
        let obj = barrier::storeval_barrier(&self.state, obj);
        self.state.globals.set(g, obj)
    }

    pub fn drop_global(&self, g: GlobalHandle) -> Result<()> {
        self.state.globals.destroy(g)
    }

    // === Classes ===

    /// Create a class loader
    ///
    /// # Returns
    /// The loader id and a handle to the loader object; the loader lives as
    /// long as that object or any of its classes, mirrors or instances
    pub fn new_class_loader(&self, name: &str) -> Result<(LoaderId, Handle)> {
        let klass = Klass::new(ClassId::CLASS_LOADER, ObjKind::Loader);
        let obj = self.allocate(klass, Shape::new(1, 1))?;
        // No safepoint between allocation and registration
        let loader = self
            .state
            .classes
            .register_loader(name, obj, self.state.marker.epoch());
        self.state.heap.store_prim(obj, 0, loader.0 as u64);
        log::trace!(target: "sgc", "New class loader {} '{}'", loader.0, name);
        Ok((loader, self.push_handle(obj)))
    }

    /// Define a class in `loader` and allocate its mirror
    ///
    /// The mirror is allocated first: a class is registered only once it
    /// has one, so a failed allocation leaves the loader unchanged.
    pub fn define_class(&self, loader: LoaderId, name: &str, layout: ClassLayout) -> Result<ClassId> {
        let classes = &self.state.classes;
        if !classes.is_loader_alive(loader) {
            return Err(SgcError::InvalidArgument(format!(
                "class loader {} is not live",
                loader.0
            )));
        }
        let klass = Klass::new(ClassId::CLASS, ObjKind::Mirror);
        let mirror = self.allocate(klass, Shape::new(layout.static_refs, 1 + layout.static_prims))?;

        // No safepoint from here on: the mirror is not rooted until attached
        let class = classes.define_class(loader, name, layout)?;
        self.state.heap.store_prim(mirror, 0, class.0 as u64);
        classes.attach_mirror(class, mirror)?;
        self.keep_loader_alive(loader);
        Ok(class)
    }

    /// The `java.lang.Class` object of `class`
    pub fn mirror_of(&self, class: ClassId) -> Result<Handle> {
        self.safepoint_poll();
        let mirror = barrier::read_barrier(&self.state, self.state.classes.mirror_of(class)?);
        // Taken from a weakly held CLD after the snapshot: mark it through
        barrier::keep_alive(&self.state, &self.thread, mirror);
        self.keep_loader_alive(self.state.classes.loader_of(class)?);
        Ok(self.push_handle(mirror))
    }

    /// Claim `loader` for the running marking through its holder
    ///
    /// Only matters while a marking that unloads classes is running. A
    /// holder allocated during that marking belongs to a loader that was
    /// claimed when it was registered.
    fn keep_loader_alive(&self, loader: LoaderId) {
        let state = &self.state;
        if !state.gc_state.is_marking() || !state.marker.unload_classes() {
            return;
        }
        if let Some(holder) = state.classes.holder_of(loader) {
            barrier::keep_alive(state, &self.thread, barrier::read_barrier(state, holder));
        }
    }

    pub fn load_static_ref(&self, class: ClassId, index: usize) -> Result<Option<Handle>> {
        let mirror = self.mirror_of(class)?;
        let v = self.load_ref(mirror, index);
        self.pop_under(mirror, v)
    }

    pub fn store_static_ref(&self, class: ClassId, index: usize, value: Option<Handle>) -> Result<()> {
        let mirror = self.mirror_of(class)?;
        let result = self.store_ref(mirror, index, value);
        self.release_handles(HandleMark(mirror.0 + 1));
        result
    }

    pub fn load_static_word(&self, class: ClassId, index: usize) -> Result<u64> {
        let mirror = self.mirror_of(class)?;
        let result = self.load_word(mirror, index + 1);
        self.release_handles(HandleMark(mirror.0));
        result
    }

    pub fn store_static_word(&self, class: ClassId, index: usize, value: u64) -> Result<()> {
        let mirror = self.mirror_of(class)?;
        let result = self.store_word(mirror, index + 1, value);
        self.release_handles(HandleMark(mirror.0));
        result
    }

    /// Replace the temporary mirror handle with the loaded value's handle
    fn pop_under(&self, mirror: Handle, loaded: Result<Option<Handle>>) -> Result<Option<Handle>> {
        let loaded = loaded?;
        let mut handles = self.thread.handles.lock();
        let value = loaded.map(|h| handles[h.0]);
        handles.truncate(mirror.0);
        Ok(value.map(|obj| {
            handles.push(obj);
            Handle(handles.len() - 1)
        }))
    }

    // === Strings ===

    /// Canonical string object for `value`
    pub fn intern(&self, value: &str) -> Result<Handle> {
        self.safepoint_poll();
        if let Some(obj) = self.state.strings.lookup(value) {
            return Ok(self.push_handle(self.keep_string(obj)));
        }

        let bytes = value.as_bytes();
        let klass = Klass::new(ClassId::STRING, ObjKind::PrimArray);
        let obj = self.allocate(klass, Shape::new(0, 1 + words_for_bytes(bytes.len())))?;
        let heap = &self.state.heap;
        heap.store_prim(obj, 0, bytes.len() as u64);
        for (i, chunk) in bytes.chunks(8).enumerate() {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            heap.store_prim(obj, 1 + i, u64::from_le_bytes(word));
        }

        let canonical = self.state.strings.insert_if_absent(value, obj);
        if canonical == obj {
            Ok(self.push_handle(obj))
        } else {
            Ok(self.push_handle(self.keep_string(canonical)))
        }
    }

    /// A table entry handed out during marking must survive the cycle
    fn keep_string(&self, obj: ObjRef) -> ObjRef {
        let obj = barrier::read_barrier(&self.state, obj);
        barrier::keep_alive(&self.state, &self.thread, obj);
        obj
    }

    /// Contents of a string object
    pub fn string_value(&self, h: Handle) -> Result<String> {
        self.safepoint_poll();
        let obj = barrier::read_barrier(&self.state, self.object(h)?);
        let heap = &self.state.heap;
        if heap.klass(obj).map(|k| k.class) != Some(ClassId::STRING) {
            return Err(SgcError::InvalidArgument(format!("{:?} is not a string", obj)));
        }
        let len = heap.load_prim(obj, 0) as usize;
        let mut bytes = Vec::with_capacity(len);
        for i in 0..words_for_bytes(len) {
            bytes.extend_from_slice(&heap.load_prim(obj, 1 + i).to_le_bytes());
        }
        bytes.truncate(len);
        String::from_utf8(bytes).map_err(|e| SgcError::Internal(format!("corrupt string: {}", e)))
    }

    // === Pinning ===

    /// Pin the object behind `h`; its region will not move until unpinned
    pub fn pin(&self, h: Handle) -> Result<()> {
        self.safepoint_poll();
        let obj = self.object(h)?;
        let obj = barrier::write_barrier(&self.state, &self.thread, obj);
        let heap = &self.state.heap;
        {
            let _lock = heap.lock();
            heap.region_of(obj).make_pinned()?;
        }
        self.thread.handles.lock()[h.0] = obj;
        Ok(())
    }

    pub fn unpin(&self, h: Handle) -> Result<()> {
        self.safepoint_poll();
        let obj = barrier::read_barrier(&self.state, self.object(h)?);
        let heap = &self.state.heap;
        let _lock = heap.lock();
        heap.region_of(obj).make_unpinned()
    }
}

impl Drop for Mutator {
    fn drop(&mut self) {
        self.safepoint_poll();
        self.thread.retire_labs(&self.state.heap);
        self.thread.flush_satb(&self.state.satb);
        self.state.threads.unregister(self.thread.id());
        self.state.safepoint.detach();
        log::debug!(target: "sgc", "Detached mutator {}", self.thread.id());
    }
}
