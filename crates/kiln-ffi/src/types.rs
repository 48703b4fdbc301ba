//! Function-pointer types of the C ABI.
//!
//! Spelled out here (rather than re-exported) so cbindgen can emit
//! typedefs for them. Each is the same type as its `kiln_runtime`
//! counterpart, which the assertions below check at compile time.

use std::ffi::{c_int, c_void};

/// Handle destructor: `(payload, size, info)`.
pub type KilnDtorFn = unsafe extern "C" fn(data: *mut c_void, size: usize, info: *mut c_void);

/// Finalizer for managed foreign memory or resizable payload elements.
pub type KilnFinalizerFn = unsafe extern "C" fn(data: *mut c_void);

/// Host `malloc`.
pub type KilnMallocFn = unsafe extern "C" fn(size: usize) -> *mut c_void;

/// Host `realloc`.
pub type KilnReallocFn = unsafe extern "C" fn(ptr: *mut c_void, size: usize) -> *mut c_void;

/// Host `free`.
pub type KilnFreeFn = unsafe extern "C" fn(ptr: *mut c_void);

/// Host atomic increment or decrement; returns the new value.
pub type KilnAtomicIncDecFn = unsafe extern "C" fn(ptr: *mut usize) -> usize;

/// Host compare-and-swap; returns non-zero on success and writes the
/// previous value to `oldptr`.
pub type KilnAtomicCasFn = unsafe extern "C" fn(
    ptr: *mut *mut c_void,
    cmp: *mut c_void,
    repl: *mut c_void,
    oldptr: *mut *mut c_void,
) -> c_int;

const _: Option<kiln_runtime::DtorFn> = None::<KilnDtorFn>;
const _: Option<kiln_runtime::ManagedDtorFn> = None::<KilnFinalizerFn>;
const _: Option<kiln_runtime::ElementDtorFn> = None::<KilnFinalizerFn>;
const _: Option<kiln_runtime::heap::MallocFn> = None::<KilnMallocFn>;
const _: Option<kiln_runtime::heap::ReallocFn> = None::<KilnReallocFn>;
const _: Option<kiln_runtime::heap::FreeFn> = None::<KilnFreeFn>;
const _: Option<kiln_runtime::atomics::IncDecFn> = None::<KilnAtomicIncDecFn>;
const _: Option<kiln_runtime::atomics::CasFn> = None::<KilnAtomicCasFn>;
