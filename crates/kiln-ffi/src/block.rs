//! Handle FFI: creation, refcounting, accessors and resizable buffers.
//!
//! Allocating entry points return null when the allocator fails. Entry
//! points taking a handle ignore a null handle (accessors return null or
//! zero; [`kiln_block_refcount`] returns `SIZE_MAX`).

use std::ffi::{c_uint, c_void};
use std::ptr::{self, NonNull};

use kiln_core::AllocError;
use kiln_runtime::layout::HEADER_SIZE;
use kiln_runtime::{manage_memory, Block, BlockPtr, ExternalAllocator};

use crate::types::{KilnDtorFn, KilnFinalizerFn};

fn to_c(result: Result<BlockPtr, AllocError>) -> *mut Block {
    result.map_or(ptr::null_mut(), NonNull::as_ptr)
}

fn payload_to_c(result: Result<NonNull<c_void>, AllocError>) -> *mut c_void {
    result.map_or(ptr::null_mut(), NonNull::as_ptr)
}

#[allow(unsafe_code)]
fn external<'a>(allocator: *const ExternalAllocator) -> Option<&'a ExternalAllocator> {
    // SAFETY: a non-null allocator outlives every handle it serves per
    // caller contract.
    unsafe { allocator.as_ref() }
}

/// Bytes of storage a handle header occupies.
///
/// Larger than the C view of `Block`, which only declares the ABI prefix.
/// Storage passed to [`kiln_block_init`] must be at least this big.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_header_size() -> usize {
    HEADER_SIZE
}

/// Initialise caller-provided header storage.
///
/// `b` must point to at least [`kiln_block_header_size`] bytes aligned for
/// a pointer (for example from [`kiln_allocate`](crate::raw::kiln_allocate)),
/// never `sizeof(Block)`; `allocator` may be null.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_init(
    b: *mut Block,
    data: *mut c_void,
    size: usize,
    dtor: Option<KilnDtorFn>,
    dtor_info: *mut c_void,
    allocator: *const ExternalAllocator,
) {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else { return };
        // SAFETY: b is writable header storage per caller contract.
        unsafe { Block::init(b, data, size, dtor, dtor_info, external(allocator)) };
    })
}

/// Wrap an existing payload in a new handle. The payload is never freed
/// by the runtime.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_new(
    data: *mut c_void,
    size: usize,
    dtor: Option<KilnDtorFn>,
    dtor_info: *mut c_void,
) -> *mut Block {
    ffi_guard!({ to_c(Block::new(data, size, dtor, dtor_info)) })
}

/// Handle with a `size`-byte payload in the same allocation.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_alloc(size: usize) -> *mut Block {
    ffi_guard!({ to_c(Block::alloc(size)) })
}

/// Like [`kiln_block_alloc`], served by `allocator` (default if null).
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_alloc_external(
    size: usize,
    allocator: *const ExternalAllocator,
) -> *mut Block {
    ffi_guard!({
        to_c(match external(allocator) {
            Some(ext) => Block::alloc_external(size, ext),
            None => Block::alloc(size),
        })
    })
}

/// Poisoned allocation without a destructor.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_alloc_safe(size: usize) -> *mut Block {
    ffi_guard!({ to_c(Block::alloc_safe(size)) })
}

/// Poisoned allocation running `dtor` before the payload is poisoned.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_alloc_dtor_safe(size: usize, dtor: Option<KilnDtorFn>) -> *mut Block {
    ffi_guard!({ to_c(Block::alloc_dtor_safe(size, dtor)) })
}

/// Allocation running `dtor` when the last reference goes.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_alloc_dtor(size: usize, dtor: Option<KilnDtorFn>) -> *mut Block {
    ffi_guard!({ to_c(Block::alloc_dtor(size, dtor)) })
}

/// Allocation whose payload address is a multiple of `align`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_alloc_aligned(size: usize, align: c_uint) -> *mut Block {
    ffi_guard!({ to_c(Block::alloc_aligned(size, align as usize)) })
}

/// Poisoned aligned allocation.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_alloc_safe_aligned(size: usize, align: c_uint) -> *mut Block {
    ffi_guard!({ to_c(Block::alloc_safe_aligned(size, align as usize)) })
}

/// Poisoned aligned allocation served by `allocator` (default if null).
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_alloc_safe_aligned_external(
    size: usize,
    align: c_uint,
    allocator: *const ExternalAllocator,
) -> *mut Block {
    ffi_guard!({
        to_c(match external(allocator) {
            Some(ext) => Block::alloc_safe_aligned_external(size, align as usize, ext),
            None => Block::alloc_safe_aligned(size, align as usize),
        })
    })
}

/// Hand foreign memory to the runtime; `dtor(data)` runs when the last
/// reference goes.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_manage_memory(data: *mut c_void, dtor: KilnFinalizerFn) -> *mut Block {
    ffi_guard!({ to_c(manage_memory(data, dtor)) })
}

/// Add a reference.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_acquire(b: *mut Block) {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else { return };
        // SAFETY: b is a live handle per caller contract.
        unsafe { Block::acquire(b) };
    })
}

/// Drop a reference, destroying the handle on the last one.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_release(b: *mut Block) {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else { return };
        // SAFETY: b is a live handle and the caller owns the reference.
        unsafe { Block::release(b) };
    })
}

/// Run the destructor and destroy the handle regardless of its refcount.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_call_dtor(b: *mut Block) {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else { return };
        // SAFETY: b is a live handle with no other users per caller contract.
        unsafe { Block::call_dtor(b) };
    })
}

/// Free the handle's storage without running its destructor.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_destroy(b: *mut Block) {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else { return };
        // SAFETY: b is a live handle with no other users per caller contract.
        unsafe { Block::destroy(b) };
    })
}

/// Free the handle's storage without counting a handle free.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_dealloc(b: *mut Block) {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else { return };
        // SAFETY: b is a live handle with no other users per caller contract.
        unsafe { Block::dealloc(b) };
    })
}

/// Payload pointer.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_data(b: *mut Block) -> *mut c_void {
    ffi_guard!({
        // SAFETY: b is a live handle per caller contract.
        NonNull::new(b).map_or(ptr::null_mut(), |b| unsafe { Block::data(b) })
    })
}

/// Payload size.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_size(b: *mut Block) -> usize {
    ffi_guard!({
        // SAFETY: b is a live handle per caller contract.
        NonNull::new(b).map_or(0, |b| unsafe { Block::size(b) })
    })
}

/// External allocator serving the handle, or null.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_external_allocator(b: *mut Block) -> *const ExternalAllocator {
    ffi_guard!({
        NonNull::new(b)
            // SAFETY: b is a live handle per caller contract.
            .and_then(|b| unsafe { Block::external_allocator(b) })
            .map_or(ptr::null(), ptr::from_ref)
    })
}

/// Destructor info word, used by higher layers as a parent pointer.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_parent(b: *mut Block) -> *mut c_void {
    ffi_guard!({
        // SAFETY: b is a live handle per caller contract.
        NonNull::new(b).map_or(ptr::null_mut(), |b| unsafe { Block::parent(b) })
    })
}

/// Current refcount, or `SIZE_MAX` for a null handle or null payload.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_refcount(b: *mut Block) -> usize {
    // SAFETY: b is null or a live handle per caller contract.
    ffi_guard!({ unsafe { Block::refcount(b) } })
}

/// Print the handle address and refcount to stderr.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_dump(b: *mut Block) {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else { return };
        let mut err = std::io::stderr().lock();
        // SAFETY: b is a live handle per caller contract.
        let _ = unsafe { Block::dump(b, &mut err) };
    })
}

/// Resizable handle with a separately allocated `size`-byte payload.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_new_varsize(size: usize) -> *mut Block {
    ffi_guard!({ to_c(Block::new_varsize(size)) })
}

/// Resizable handle whose payload is passed to `element_dtor` before it is
/// freed.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_new_varsize_dtor(size: usize, element_dtor: KilnFinalizerFn) -> *mut Block {
    ffi_guard!({ to_c(Block::new_varsize_dtor(size, element_dtor)) })
}

/// Replace the payload with a fresh allocation. The old payload is not
/// freed. Aborts on a non-resizable handle.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_varsize_alloc(b: *mut Block, size: usize) -> *mut c_void {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else {
            return ptr::null_mut();
        };
        // SAFETY: b is a live handle per caller contract.
        payload_to_c(unsafe { Block::varsize_alloc(b, size) })
    })
}

/// Resize the payload. Aborts on a non-resizable handle.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_varsize_realloc(b: *mut Block, size: usize) -> *mut c_void {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else {
            return ptr::null_mut();
        };
        // SAFETY: b is a live handle per caller contract.
        payload_to_c(unsafe { Block::varsize_realloc(b, size) })
    })
}

/// Free `ptr`, clearing the handle's payload if it matches.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_block_varsize_free(b: *mut Block, ptr: *mut c_void) {
    ffi_guard!({
        let Some(b) = NonNull::new(b) else { return };
        // SAFETY: b is live and ptr is null or a default-heap pointer per
        // caller contract.
        unsafe { Block::varsize_free(b, ptr) };
    })
}
