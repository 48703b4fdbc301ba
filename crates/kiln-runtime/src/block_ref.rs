//! Owning handle wrapper for Rust callers.

use std::ffi::c_void;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use kiln_core::AllocError;

use crate::block::{Block, BlockKind, BlockPtr, DtorFn};
use crate::external::ExternalAllocator;
use crate::varsize::ElementDtorFn;

/// One counted reference to a handle.
///
/// `Clone` acquires a reference and `Drop` releases it. The raw handle
/// can be passed to generated code with [`into_raw`](Self::into_raw) and
/// taken back with [`from_raw`](Self::from_raw).
///
/// `BlockRef` is `Send` and `Sync` so references can be handed between
/// threads. That is only sound once real atomic primitives (for example
/// [`HostAtomics`](crate::atomics::HostAtomics)) are installed; the
/// default stand-ins lose updates under concurrency.
pub struct BlockRef {
    ptr: BlockPtr,
}

// SAFETY: refcount updates go through the installed atomic primitives and
// the payload is raw memory with no thread affinity.
unsafe impl Send for BlockRef {}
// SAFETY: shared access only reads header fields or updates the refcount.
unsafe impl Sync for BlockRef {}

impl BlockRef {
    fn wrap(ptr: Result<BlockPtr, AllocError>) -> Result<Self, AllocError> {
        ptr.map(|ptr| Self { ptr })
    }

    /// See [`Block::alloc`].
    pub fn alloc(size: usize) -> Result<Self, AllocError> {
        Self::wrap(Block::alloc(size))
    }

    /// See [`Block::alloc_external`].
    pub fn alloc_external(
        size: usize,
        external: &'static ExternalAllocator,
    ) -> Result<Self, AllocError> {
        Self::wrap(Block::alloc_external(size, external))
    }

    /// See [`Block::alloc_safe`].
    pub fn alloc_safe(size: usize) -> Result<Self, AllocError> {
        Self::wrap(Block::alloc_safe(size))
    }

    /// See [`Block::alloc_dtor`].
    pub fn alloc_dtor(size: usize, dtor: DtorFn) -> Result<Self, AllocError> {
        Self::wrap(Block::alloc_dtor(size, Some(dtor)))
    }

    /// See [`Block::alloc_aligned`].
    pub fn alloc_aligned(size: usize, align: usize) -> Result<Self, AllocError> {
        Self::wrap(Block::alloc_aligned(size, align))
    }

    /// See [`Block::alloc_with_finalizer`].
    pub fn alloc_with_finalizer<F>(size: usize, finalizer: F) -> Result<Self, AllocError>
    where
        F: FnOnce(*mut u8, usize) + Send + 'static,
    {
        Self::wrap(Block::alloc_with_finalizer(size, finalizer))
    }

    /// See [`Block::new_varsize`].
    pub fn new_varsize(size: usize) -> Result<Self, AllocError> {
        Self::wrap(Block::new_varsize(size))
    }

    /// See [`Block::new_varsize_dtor`].
    pub fn new_varsize_dtor(size: usize, element_dtor: ElementDtorFn) -> Result<Self, AllocError> {
        Self::wrap(Block::new_varsize_dtor(size, element_dtor))
    }

    /// Take ownership of one reference held by a raw handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live handle and the caller must own the reference
    /// being transferred.
    pub unsafe fn from_raw(ptr: BlockPtr) -> Self {
        Self { ptr }
    }

    /// Give up the reference without releasing it.
    pub fn into_raw(self) -> BlockPtr {
        ManuallyDrop::new(self).ptr
    }

    /// The raw handle, still owned by `self`.
    pub fn as_ptr(&self) -> BlockPtr {
        self.ptr
    }

    /// Payload pointer.
    pub fn data(&self) -> *mut c_void {
        // SAFETY: self holds a reference, so the handle is live.
        unsafe { Block::data(self.ptr) }
    }

    /// Payload pointer as bytes, if set.
    pub fn data_ptr(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.data().cast())
    }

    /// Payload size.
    pub fn size(&self) -> usize {
        // SAFETY: self holds a reference.
        unsafe { Block::size(self.ptr) }
    }

    /// Current refcount (see [`Block::refcount`]).
    pub fn refcount(&self) -> usize {
        // SAFETY: self holds a reference.
        unsafe { Block::refcount(self.ptr.as_ptr()) }
    }

    /// Fixed or Resizable.
    pub fn kind(&self) -> BlockKind {
        // SAFETY: self holds a reference.
        unsafe { Block::kind(self.ptr) }
    }

    /// The handle's external allocator.
    pub fn external_allocator(&self) -> Option<&'static ExternalAllocator> {
        // SAFETY: self holds a reference.
        unsafe { Block::external_allocator(self.ptr) }
    }

    /// The destructor info word.
    pub fn parent(&self) -> *mut c_void {
        // SAFETY: self holds a reference.
        unsafe { Block::parent(self.ptr) }
    }

    /// Whether both refer to the same handle.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }
}

impl Clone for BlockRef {
    fn clone(&self) -> Self {
        // SAFETY: self holds a reference.
        unsafe { Block::acquire(self.ptr) };
        Self { ptr: self.ptr }
    }
}

impl Drop for BlockRef {
    fn drop(&mut self) {
        // SAFETY: self owns exactly one reference.
        unsafe { Block::release(self.ptr) };
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRef")
            .field("ptr", &self.ptr)
            .field("size", &self.size())
            .field("kind", &self.kind())
            .finish()
    }
}
