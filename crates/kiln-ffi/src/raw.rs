//! Counted allocation wrappers and the sample external allocator.

use std::ffi::c_void;
use std::ptr;

use kiln_runtime::{raw, sample_external_allocator, ExternalAllocator};

/// Allocate `size` bytes from the default allocator. Null on failure.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_allocate(size: usize) -> *mut c_void {
    ffi_guard!({ raw::allocate(size).map_or(ptr::null_mut(), |p| p.as_ptr().cast()) })
}

/// Allocate `size` bytes from `allocator`, or from the default allocator
/// when it is null. Null on failure.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_allocate_external(
    size: usize,
    allocator: *const ExternalAllocator,
) -> *mut c_void {
    ffi_guard!({
        // SAFETY: allocator is null or valid per caller contract.
        let ext = unsafe { allocator.as_ref() };
        raw::allocate_external(size, ext).map_or(ptr::null_mut(), |p| p.as_ptr().cast())
    })
}

/// Resize `ptr` through the default allocator. Null on failure, in which
/// case `ptr` is still valid. Not counted.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_reallocate(ptr: *mut c_void, size: usize) -> *mut c_void {
    ffi_guard!({
        // SAFETY: ptr came from the default allocator per caller contract.
        unsafe { raw::reallocate(ptr.cast(), size) }
            .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
    })
}

/// Free `ptr` through the default allocator. Null is ignored.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_free(ptr: *mut c_void) {
    ffi_guard!({
        // SAFETY: ptr is null or came from the default allocator per caller
        // contract.
        unsafe { raw::free(ptr.cast()) }
    })
}

/// The reference external allocator (token `0xabacad`).
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_sample_external_allocator() -> *const ExternalAllocator {
    ffi_guard!({ ptr::from_ref(sample_external_allocator()) })
}
