//! Runtime configuration FFI: init, shutdown, allocator and atomics
//! installation, statistics.
//!
//! None of these calls is serialised against allocation on other threads.
//! Hosts configure the runtime before generated code runs.

use std::ffi::{c_int, c_void};
use std::sync::atomic::AtomicPtr;

use kiln_runtime::{memsys, ExternAtomics, ExternCas, HeapFns};

use crate::registry;
use crate::types::{KilnAtomicCasFn, KilnAtomicIncDecFn, KilnFreeFn, KilnMallocFn, KilnReallocFn};

/// Initialise the runtime: zero the statistics, bind the C heap and the
/// non-atomic stand-in primitives.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_init() {
    ffi_guard!({
        #[cfg(feature = "debug-trace")]
        let _ = env_logger::try_init();
        memsys().init();
    })
}

/// Begin shutdown: destructors are skipped from now on and the atomic
/// primitives revert to the stand-ins.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_shutdown() {
    ffi_guard!({ memsys().shutdown() })
}

/// Install a `malloc`/`realloc`/`free` triple as the default allocator.
///
/// Aborts if the triple differs from the current allocator while
/// allocations are outstanding.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_set_allocator(
    malloc: KilnMallocFn,
    realloc: KilnReallocFn,
    free: KilnFreeFn,
) {
    ffi_guard!({
        let heap = registry::heap(HeapFns {
            malloc,
            realloc,
            free,
        });
        memsys().set_allocator(heap);
    })
}

/// Install host increment and decrement primitives.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_set_atomic_inc_dec(inc: KilnAtomicIncDecFn, dec: KilnAtomicIncDecFn) {
    ffi_guard!({
        memsys().set_atomic_inc_dec(registry::inc_dec(ExternAtomics { inc, dec }));
    })
}

/// Install a host compare-and-swap primitive.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_set_atomic_cas(cas: KilnAtomicCasFn) {
    ffi_guard!({
        memsys().set_atomic_cas(registry::cas(ExternCas { cas }));
    })
}

/// Reinstall the non-atomic increment/decrement stand-ins.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_set_atomic_inc_dec_stub() {
    ffi_guard!({ memsys().set_atomic_inc_dec_stub() })
}

/// Reinstall the non-atomic compare-and-swap stand-in.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_set_atomic_cas_stub() {
    ffi_guard!({ memsys().set_atomic_cas_stub() })
}

/// Compare-and-swap `*ptr` through the installed primitive.
///
/// Writes the previous value to `oldptr` (if non-null) and returns 1 on
/// success, 0 otherwise.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_atomic_cas(
    ptr: *mut *mut c_void,
    cmp: *mut c_void,
    repl: *mut c_void,
    oldptr: *mut *mut c_void,
) -> c_int {
    ffi_guard!({
        if ptr.is_null() {
            return 0;
        }
        // SAFETY: ptr is a valid, aligned pointer slot per caller contract
        // and is only accessed through the installed primitive meanwhile.
        let slot = unsafe { AtomicPtr::from_ptr(ptr) };
        let (swapped, old) = match memsys().atomic_cas(slot, cmp, repl) {
            Ok(old) => (1, old),
            Err(old) => (0, old),
        };
        if !oldptr.is_null() {
            // SAFETY: oldptr is valid for writes per caller contract.
            unsafe { *oldptr = old };
        }
        swapped
    })
}

/// Raw allocations made through the runtime.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_get_stats_alloc() -> usize {
    ffi_guard!({ memsys().stats_alloc() })
}

/// Raw frees made through the runtime.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_get_stats_free() -> usize {
    ffi_guard!({ memsys().stats_free() })
}

/// Handles created.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_get_stats_handle_alloc() -> usize {
    ffi_guard!({ memsys().stats_handle_alloc() })
}

/// Handles destroyed.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn kiln_memsys_get_stats_handle_free() -> usize {
    ffi_guard!({ memsys().stats_handle_free() })
}
