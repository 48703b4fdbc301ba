//! The reference-counted block header.
//!
//! A [`Block`] is what generated code holds: a refcount, an optional
//! destructor with its opaque info word, the payload pointer and size, and
//! the external allocator (if any) that owns the storage. The first six
//! fields form a C ABI prefix that generated code reads directly, so their
//! order and `repr(C)` layout are fixed.
//!
//! Handles are manipulated through [`BlockPtr`] and associated functions
//! (`Block::acquire(b)`, `Block::data(b)`), never through `&Block`: the
//! header is shared with foreign code and the payload fields of resizable
//! handles are rewritten in place.
//!
//! # Lifecycle
//!
//! Every handle starts at refcount 1. [`Block::release`] taking the count
//! to zero runs the destructor once (skipped during shutdown) and then
//! frees the header storage once through the allocator that produced it.

use std::ffi::c_void;
use std::io;
use std::mem::{align_of, offset_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use kiln_core::{poison, AllocError};

use crate::dtor;
use crate::external::ExternalAllocator;
use crate::heap::{Allocator, MIN_ALIGN};
use crate::layout::{self, CombinedBlock, HEADER_SIZE};
use crate::memsys::memsys;
use crate::raw;

/// Destructor called with `(payload, size, dtor_info)` when a handle dies.
pub type DtorFn = unsafe extern "C" fn(data: *mut c_void, size: usize, info: *mut c_void);

/// Pointer to a live handle header.
pub type BlockPtr = NonNull<Block>;

/// Returned by [`Block::refcount`] for a null handle or a handle whose
/// payload has been released.
pub const INVALID_REFCOUNT: usize = usize::MAX;

/// How a handle's payload is owned.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// Payload allocated together with the header, or foreign memory.
    Fixed = 0,
    /// Payload allocated separately and resizable through
    /// [`varsize`](crate::varsize).
    Resizable = 1,
}

/// Handle header.
#[repr(C)]
pub struct Block {
    refct: AtomicUsize,
    dtor: Option<DtorFn>,
    dtor_info: *mut c_void,
    data: *mut c_void,
    size: usize,
    external_allocator: *const ExternalAllocator,
    // Not part of the ABI prefix.
    kind: BlockKind,
}

const WORD: usize = size_of::<usize>();

const _: () = {
    assert!(offset_of!(Block, refct) == 0);
    assert!(offset_of!(Block, dtor) == WORD);
    assert!(offset_of!(Block, dtor_info) == 2 * WORD);
    assert!(offset_of!(Block, data) == 3 * WORD);
    assert!(offset_of!(Block, size) == 4 * WORD);
    assert!(offset_of!(Block, external_allocator) == 5 * WORD);
    assert!(offset_of!(Block, kind) == 6 * WORD);
    assert!(align_of::<Block>() <= MIN_ALIGN);
    assert!(size_of::<Option<DtorFn>>() == WORD);
};

impl Block {
    /// Initialise a header in place: refcount 1, Fixed kind.
    ///
    /// Counts one handle allocation.
    ///
    /// # Safety
    ///
    /// `b` must point to writable storage of at least [`HEADER_SIZE`]
    /// bytes, aligned for `Block`, that is not a live handle.
    pub unsafe fn init(
        b: BlockPtr,
        data: *mut c_void,
        size: usize,
        dtor: Option<DtorFn>,
        dtor_info: *mut c_void,
        external: Option<&'static ExternalAllocator>,
    ) {
        // SAFETY: forwarded caller contract.
        unsafe { Self::init_kind(b, data, size, dtor, dtor_info, external, BlockKind::Fixed) }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) unsafe fn init_kind(
        b: BlockPtr,
        data: *mut c_void,
        size: usize,
        dtor: Option<DtorFn>,
        dtor_info: *mut c_void,
        external: Option<&'static ExternalAllocator>,
        kind: BlockKind,
    ) {
        let external_allocator = external.map_or(ptr::null(), ptr::from_ref);
        // SAFETY: b is valid for writes per the caller contract.
        unsafe {
            b.as_ptr().write(Block {
                refct: AtomicUsize::new(1),
                dtor,
                dtor_info,
                data,
                size,
                external_allocator,
                kind,
            });
        }
        kiln_trace!("init {:p} external_allocator={:p}", b, external_allocator);
        memsys().count_handle_alloc();
    }

    /// Wrap an existing payload in a separately allocated header.
    ///
    /// The runtime never frees `data`; releasing the last reference runs
    /// `dtor` (if any) and frees only the header.
    pub fn new(
        data: *mut c_void,
        size: usize,
        dtor: Option<DtorFn>,
        dtor_info: *mut c_void,
    ) -> Result<BlockPtr, AllocError> {
        let b = raw::allocate(HEADER_SIZE)?.cast::<Block>();
        kiln_trace!("new {:p}", b);
        // SAFETY: b is fresh MIN_ALIGN-aligned storage of HEADER_SIZE bytes.
        unsafe { Self::init(b, data, size, dtor, dtor_info, None) };
        Ok(b)
    }

    fn from_combined(
        block: CombinedBlock,
        size: usize,
        dtor: Option<DtorFn>,
        dtor_info: *mut c_void,
        external: Option<&'static ExternalAllocator>,
    ) -> BlockPtr {
        let b = block.header();
        // SAFETY: the header slot is the start of a fresh allocation at
        // least HEADER_SIZE bytes long and MIN_ALIGN-aligned.
        unsafe {
            Self::init(
                b,
                block.payload().as_ptr().cast(),
                size,
                dtor,
                dtor_info,
                external,
            )
        };
        b
    }

    fn fill(block: &CombinedBlock, size: usize) {
        // SAFETY: the payload spans at least size bytes.
        unsafe { ptr::write_bytes(block.payload().as_ptr(), poison::UNINIT, size) };
    }

    /// Header and `size` payload bytes in one allocation, no destructor.
    pub fn alloc(size: usize) -> Result<BlockPtr, AllocError> {
        let block = layout::allocate_combined(size, None)?;
        kiln_trace!("alloc {:p}", block.payload());
        Ok(Self::from_combined(block, size, None, ptr::null_mut(), None))
    }

    /// Like [`alloc`](Self::alloc), served by `external`.
    pub fn alloc_external(
        size: usize,
        external: &'static ExternalAllocator,
    ) -> Result<BlockPtr, AllocError> {
        let block = layout::allocate_combined(size, Some(external))?;
        kiln_trace!("alloc_external {:p}", block.payload());
        Ok(Self::from_combined(
            block,
            size,
            None,
            ptr::null_mut(),
            Some(external),
        ))
    }

    /// Poisoned allocation: the payload starts as
    /// [`UNINIT`](kiln_core::poison::UNINIT) bytes and is overwritten with
    /// [`FREED`](kiln_core::poison::FREED) when the handle dies.
    pub fn alloc_safe(size: usize) -> Result<BlockPtr, AllocError> {
        Self::alloc_dtor_safe(size, None)
    }

    /// Like [`alloc_safe`](Self::alloc_safe), running `dtor` before the
    /// payload is poisoned.
    pub fn alloc_dtor_safe(size: usize, dtor: Option<DtorFn>) -> Result<BlockPtr, AllocError> {
        let block = layout::allocate_combined(size, None)?;
        Self::fill(&block, size);
        kiln_trace!("alloc_dtor_safe {:p} {}", block.payload(), size);
        Ok(Self::from_combined(
            block,
            size,
            Some(dtor::custom_dtor_safe),
            dtor::dtor_to_info(dtor),
            None,
        ))
    }

    /// Combined allocation whose destructor forwards to `dtor`.
    pub fn alloc_dtor(size: usize, dtor: Option<DtorFn>) -> Result<BlockPtr, AllocError> {
        let block = layout::allocate_combined(size, None)?;
        kiln_trace!("alloc_dtor {:p} {}", block.payload(), size);
        Ok(Self::from_combined(
            block,
            size,
            Some(dtor::custom_dtor),
            dtor::dtor_to_info(dtor),
            None,
        ))
    }

    /// Combined allocation with the payload start a multiple of `align`.
    ///
    /// `align` need not be a power of two; zero is treated as one.
    pub fn alloc_aligned(size: usize, align: usize) -> Result<BlockPtr, AllocError> {
        let block = layout::allocate_combined_aligned(size, align, None)?;
        kiln_trace!("alloc_aligned {:p}", block.payload());
        Ok(Self::from_combined(block, size, None, ptr::null_mut(), None))
    }

    /// Poisoned variant of [`alloc_aligned`](Self::alloc_aligned).
    pub fn alloc_safe_aligned(size: usize, align: usize) -> Result<BlockPtr, AllocError> {
        Self::safe_aligned(size, align, None)
    }

    /// Poisoned aligned allocation served by `external`.
    pub fn alloc_safe_aligned_external(
        size: usize,
        align: usize,
        external: &'static ExternalAllocator,
    ) -> Result<BlockPtr, AllocError> {
        Self::safe_aligned(size, align, Some(external))
    }

    fn safe_aligned(
        size: usize,
        align: usize,
        external: Option<&'static ExternalAllocator>,
    ) -> Result<BlockPtr, AllocError> {
        let block = layout::allocate_combined_aligned(size, align, external)?;
        Self::fill(&block, size);
        kiln_trace!("alloc_safe_aligned {:p} {}", block.payload(), size);
        Ok(Self::from_combined(
            block,
            size,
            Some(dtor::dtor_safe),
            dtor::size_to_info(size),
            external,
        ))
    }

    /// # Safety
    ///
    /// `b` must be live for `'a`.
    unsafe fn refct<'a>(b: BlockPtr) -> &'a AtomicUsize {
        // SAFETY: b is live per the caller contract; the refcount word is
        // only ever accessed atomically.
        unsafe { &(*b.as_ptr()).refct }
    }

    #[cfg(feature = "refcount-check")]
    fn check_live(refct: &AtomicUsize, operation: &'static str) {
        if refct.load(Ordering::Relaxed) == 0 {
            crate::fatal::fatal(kiln_core::ContractViolation::RefcountUnderflow { operation });
        }
    }

    /// Add a reference.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle.
    pub unsafe fn acquire(b: BlockPtr) {
        // SAFETY: b is live per the caller contract.
        let refct = unsafe { Self::refct(b) };
        kiln_trace!("acquire {:p} refct={}", b, refct.load(Ordering::Relaxed));
        #[cfg(feature = "refcount-check")]
        Self::check_live(refct, "acquire");
        memsys().increment(refct);
    }

    /// Drop a reference, destroying the handle when it was the last one.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle and the caller must own the reference
    /// being dropped. If this was the last reference, `b` is dangling
    /// afterwards and the destructor must be sound to call.
    pub unsafe fn release(b: BlockPtr) {
        // SAFETY: b is live per the caller contract.
        let refct = unsafe { Self::refct(b) };
        kiln_trace!("release {:p} refct={}", b, refct.load(Ordering::Relaxed));
        #[cfg(feature = "refcount-check")]
        Self::check_live(refct, "release");
        if memsys().decrement(refct) == 0 {
            // SAFETY: the count reached zero, so this is the only reference.
            unsafe { Self::call_dtor(b) };
        }
    }

    /// Run the destructor (unless shutting down) and destroy the handle.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle with no other references.
    pub unsafe fn call_dtor(b: BlockPtr) {
        kiln_trace!("call_dtor {:p}", b);
        let p = b.as_ptr();
        // SAFETY: b is live per the caller contract.
        let (dtor, data, size, info) = unsafe { ((*p).dtor, (*p).data, (*p).size, (*p).dtor_info) };
        if let Some(dtor) = dtor {
            if !memsys().is_shutting_down() {
                // SAFETY: the destructor was registered for this payload.
                unsafe { dtor(data, size, info) };
            }
        }
        // SAFETY: forwarded caller contract.
        unsafe { Self::destroy(b) };
    }

    /// Free the header storage and count one handle free. The destructor
    /// is not run.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle with no other references.
    pub unsafe fn destroy(b: BlockPtr) {
        // SAFETY: forwarded caller contract.
        unsafe { Self::dealloc(b) };
        memsys().count_handle_free();
    }

    /// Free the header storage through the allocator that produced it.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle with no other references.
    pub unsafe fn dealloc(b: BlockPtr) {
        // SAFETY: b is live per the caller contract.
        let ext = unsafe { (*b.as_ptr()).external_allocator };
        kiln_trace!("dealloc {:p} external_allocator={:p}", b, ext);
        let base = b.as_ptr().cast::<u8>();
        // SAFETY: a non-null external allocator pointer outlives the handle
        // and produced its storage; otherwise the default allocator did.
        unsafe {
            match ext.as_ref() {
                Some(ext) => {
                    ext.free(base);
                    memsys().count_free();
                }
                None => raw::free(base),
            }
        }
    }

    /// Payload pointer.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle.
    pub unsafe fn data(b: BlockPtr) -> *mut c_void {
        // SAFETY: b is live per the caller contract.
        unsafe { (*b.as_ptr()).data }
    }

    /// Payload size in bytes. Only meaningful for runtime-allocated
    /// payloads.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle.
    pub unsafe fn size(b: BlockPtr) -> usize {
        // SAFETY: b is live per the caller contract.
        unsafe { (*b.as_ptr()).size }
    }

    /// The external allocator serving this handle, if any.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle.
    pub unsafe fn external_allocator(b: BlockPtr) -> Option<&'static ExternalAllocator> {
        // SAFETY: b is live; a stored allocator pointer came from a
        // 'static reference.
        unsafe { (*b.as_ptr()).external_allocator.as_ref() }
    }

    /// The destructor info word. Higher layers use it as a back-reference
    /// to the owning object.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle.
    pub unsafe fn parent(b: BlockPtr) -> *mut c_void {
        // SAFETY: b is live per the caller contract.
        unsafe { (*b.as_ptr()).dtor_info }
    }

    /// Fixed or Resizable.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle.
    pub unsafe fn kind(b: BlockPtr) -> BlockKind {
        // SAFETY: b is live per the caller contract.
        unsafe { (*b.as_ptr()).kind }
    }

    /// Current refcount, or [`INVALID_REFCOUNT`] when `b` is null or its
    /// payload pointer is null.
    ///
    /// # Safety
    ///
    /// `b` must be null or a live handle.
    pub unsafe fn refcount(b: *const Block) -> usize {
        let Some(b) = NonNull::new(b.cast_mut()) else {
            return INVALID_REFCOUNT;
        };
        // SAFETY: b is live per the caller contract.
        unsafe {
            if (*b.as_ptr()).data.is_null() {
                INVALID_REFCOUNT
            } else {
                Self::refct(b).load(Ordering::Acquire)
            }
        }
    }

    /// Write a one-line description of the handle to `out`.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle.
    pub unsafe fn dump(b: BlockPtr, out: &mut dyn io::Write) -> io::Result<()> {
        // SAFETY: b is live per the caller contract.
        let refct = unsafe { Self::refct(b) }.load(Ordering::Acquire);
        writeln!(out, "Block {:p} refcount {}", b, refct)
    }

    pub(crate) unsafe fn set_payload(b: BlockPtr, data: *mut c_void, size: usize) {
        // SAFETY: b is live and exclusively managed by the caller.
        unsafe {
            (*b.as_ptr()).data = data;
            (*b.as_ptr()).size = size;
        }
    }

    pub(crate) unsafe fn set_dtor(b: BlockPtr, dtor: Option<DtorFn>, dtor_info: *mut c_void) {
        // SAFETY: b is live and exclusively managed by the caller.
        unsafe {
            (*b.as_ptr()).dtor = dtor;
            (*b.as_ptr()).dtor_info = dtor_info;
        }
    }

    pub(crate) unsafe fn clear_data(b: BlockPtr) {
        // SAFETY: b is live and exclusively managed by the caller.
        unsafe { (*b.as_ptr()).data = ptr::null_mut() };
    }
}
