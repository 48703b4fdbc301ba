//! Function table handed to generated code.
//!
//! JIT-compiled code does not link against the runtime's symbols; the host
//! passes it the table returned by [`kiln_get_api`] instead. The field
//! order is part of the ABI.

use std::ffi::c_void;
use std::ptr;

use kiln_runtime::{Block, ExternalAllocator};

use crate::block::{
    kiln_block_acquire, kiln_block_alloc, kiln_block_alloc_external, kiln_block_data,
    kiln_block_release, kiln_manage_memory,
};
use crate::types::KilnFinalizerFn;

/// Runtime entry points available to generated code.
#[repr(C)]
pub struct KilnApiFunctions {
    /// [`kiln_block_alloc`].
    pub allocate: extern "C" fn(size: usize) -> *mut Block,
    /// [`kiln_block_alloc_external`].
    pub allocate_external:
        extern "C" fn(size: usize, allocator: *const ExternalAllocator) -> *mut Block,
    /// [`kiln_manage_memory`].
    pub manage_memory: extern "C" fn(data: *mut c_void, dtor: KilnFinalizerFn) -> *mut Block,
    /// [`kiln_block_acquire`].
    pub acquire: extern "C" fn(b: *mut Block),
    /// [`kiln_block_release`].
    pub release: extern "C" fn(b: *mut Block),
    /// [`kiln_block_data`].
    pub get_data: extern "C" fn(b: *mut Block) -> *mut c_void,
}

static API: KilnApiFunctions = KilnApiFunctions {
    allocate: kiln_block_alloc,
    allocate_external: kiln_block_alloc_external,
    manage_memory: kiln_manage_memory,
    acquire: kiln_block_acquire,
    release: kiln_block_release,
    get_data: kiln_block_data,
};

/// The process-wide function table. Never null; valid for the life of the
/// process.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_get_api() -> *const KilnApiFunctions {
    ptr::from_ref(&API)
}
