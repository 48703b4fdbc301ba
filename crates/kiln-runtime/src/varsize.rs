//! Resizable buffers.
//!
//! A resizable handle owns a payload allocated separately from its header,
//! so the payload can be replaced or resized in place while references to
//! the handle stay valid. Such handles carry [`BlockKind::Resizable`];
//! every resize operation checks that tag and aborts on a Fixed handle.
//!
//! Any raw pointer into the payload is invalidated by
//! [`Block::varsize_alloc`] and [`Block::varsize_realloc`].

use std::ffi::c_void;
use std::ptr::NonNull;

use kiln_core::{AllocError, ContractViolation};

use crate::block::{Block, BlockKind, BlockPtr};
use crate::dtor::{finalizer_to_info, info_to_finalizer};
use crate::fatal::fatal;
use crate::layout::HEADER_SIZE;
use crate::raw;

/// Finalizer run on a resizable payload before it is freed.
pub type ElementDtorFn = unsafe extern "C" fn(data: *mut c_void);

unsafe extern "C" fn varsize_dtor(data: *mut c_void, _size: usize, info: *mut c_void) {
    kiln_trace!("varsize_dtor {:p}", data);
    if data.is_null() {
        return;
    }
    // SAFETY: info was built by finalizer_to_info in new_varsize_with.
    if let Some(element_dtor) = unsafe { info_to_finalizer(info) } {
        // SAFETY: the element finalizer was registered for this payload.
        unsafe { element_dtor(data) };
    }
    // SAFETY: resizable payloads always come from the default allocator.
    unsafe { raw::free(data.cast()) };
}

/// # Safety
///
/// `b` must be a live handle.
unsafe fn require_resizable(b: BlockPtr, operation: &'static str) {
    // SAFETY: forwarded caller contract.
    if unsafe { Block::kind(b) } != BlockKind::Resizable {
        fatal(ContractViolation::NotResizable { operation });
    }
}

impl Block {
    /// Resizable handle with a fresh `size`-byte payload and no element
    /// finalizer.
    pub fn new_varsize(size: usize) -> Result<BlockPtr, AllocError> {
        Self::new_varsize_with(size, None)
    }

    /// Resizable handle whose payload is passed to `element_dtor` before it
    /// is freed.
    pub fn new_varsize_dtor(
        size: usize,
        element_dtor: ElementDtorFn,
    ) -> Result<BlockPtr, AllocError> {
        Self::new_varsize_with(size, Some(element_dtor))
    }

    fn new_varsize_with(
        size: usize,
        element_dtor: Option<ElementDtorFn>,
    ) -> Result<BlockPtr, AllocError> {
        let data = raw::allocate(size)?;
        let b = match raw::allocate(HEADER_SIZE) {
            Ok(b) => b.cast::<Block>(),
            Err(e) => {
                // SAFETY: data was just allocated and never shared.
                unsafe { raw::free(data.as_ptr()) };
                return Err(e);
            }
        };
        // SAFETY: b is fresh MIN_ALIGN-aligned storage of HEADER_SIZE bytes.
        unsafe {
            Block::init_kind(
                b,
                data.as_ptr().cast(),
                size,
                Some(varsize_dtor),
                finalizer_to_info(element_dtor),
                None,
                BlockKind::Resizable,
            )
        };
        kiln_trace!("new_varsize size={} -> {:p}, data={:p}", size, b, data);
        Ok(b)
    }

    /// Allocate a fresh payload and make it the handle's payload.
    ///
    /// The previous payload is not freed; release it with
    /// [`varsize_free`](Self::varsize_free) first if it is still set. On
    /// failure the handle is unchanged.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle. Aborts if it is not resizable.
    pub unsafe fn varsize_alloc(b: BlockPtr, size: usize) -> Result<NonNull<c_void>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { require_resizable(b, "varsize_alloc") };
        let data = raw::allocate(size)?;
        // SAFETY: b is live; the caller serialises payload changes.
        unsafe { Block::set_payload(b, data.as_ptr().cast(), size) };
        kiln_trace!("varsize_alloc {:p} size={} -> data={:p}", b, size, data);
        Ok(data.cast())
    }

    /// Resize the handle's payload through the default allocator.
    ///
    /// A handle whose payload was freed gets a fresh allocation. On failure
    /// the handle and its payload are unchanged.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle. Aborts if it is not resizable.
    pub unsafe fn varsize_realloc(
        b: BlockPtr,
        size: usize,
    ) -> Result<NonNull<c_void>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { require_resizable(b, "varsize_realloc") };
        // SAFETY: b is live.
        let old = unsafe { Block::data(b) };
        let data = if old.is_null() {
            raw::allocate(size)?
        } else {
            // SAFETY: resizable payloads come from the default allocator.
            unsafe { raw::reallocate(old.cast(), size)? }
        };
        // SAFETY: b is live; the caller serialises payload changes.
        unsafe { Block::set_payload(b, data.as_ptr().cast(), size) };
        kiln_trace!("varsize_realloc {:p} size={} -> data={:p}", b, size, data);
        Ok(data.cast())
    }

    /// Free `ptr` and, if it is the handle's payload, clear the payload
    /// pointer. The refcount is untouched.
    ///
    /// # Safety
    ///
    /// `b` must be a live handle. `ptr` must be null or an unfreed pointer
    /// from the default allocator.
    pub unsafe fn varsize_free(b: BlockPtr, ptr: *mut c_void) {
        // SAFETY: forwarded caller contract.
        unsafe {
            raw::free(ptr.cast());
            if ptr == Block::data(b) {
                Block::clear_data(b);
            }
        }
    }
}
