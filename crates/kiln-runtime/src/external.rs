//! Foreign allocators attached to individual handles.
//!
//! An [`ExternalAllocator`] is chosen when a handle is created and serves
//! both the header and the payload as one combined request. The handle
//! keeps a pointer to it, so the allocator must outlive every handle it
//! produced.

use std::ffi::c_void;
use std::fmt;
use std::ptr;

use crate::heap::Allocator;
use crate::memsys::memsys;

/// `malloc` with an opaque token.
pub type ExtMallocFn = unsafe extern "C" fn(size: usize, opaque: *mut c_void) -> *mut c_void;
/// `realloc` with an opaque token.
pub type ExtReallocFn =
    unsafe extern "C" fn(ptr: *mut c_void, size: usize, opaque: *mut c_void) -> *mut c_void;
/// `free` with an opaque token.
pub type ExtFreeFn = unsafe extern "C" fn(ptr: *mut c_void, opaque: *mut c_void);

/// A per-handle allocator: three entry points plus the token passed to
/// each of them.
#[repr(C)]
pub struct ExternalAllocator {
    /// Allocation entry point.
    pub malloc: ExtMallocFn,
    /// Reallocation entry point.
    pub realloc: ExtReallocFn,
    /// Deallocation entry point.
    pub free: ExtFreeFn,
    /// Token forwarded to every entry point.
    pub opaque_data: *mut c_void,
}

// SAFETY: the struct is immutable once built and the entry points are
// required to be callable from any thread.
unsafe impl Send for ExternalAllocator {}
// SAFETY: as above.
unsafe impl Sync for ExternalAllocator {}

impl fmt::Debug for ExternalAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalAllocator")
            .field("malloc", &(self.malloc as *const ()))
            .field("realloc", &(self.realloc as *const ()))
            .field("free", &(self.free as *const ()))
            .field("opaque_data", &self.opaque_data)
            .finish()
    }
}

// SAFETY: whoever builds an ExternalAllocator vouches that its entry
// points honour the Allocator contract for the given token.
unsafe impl Allocator for ExternalAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc-like entry point, no preconditions.
        unsafe { (self.malloc)(size, self.opaque_data).cast() }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: ptr came from this allocator per the caller contract.
        unsafe { (self.realloc)(ptr.cast(), size, self.opaque_data).cast() }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: ptr came from this allocator per the caller contract.
        unsafe { (self.free)(ptr.cast(), self.opaque_data) }
    }
}

/// Token the sample allocator expects.
pub const SAMPLE_TOKEN_VALUE: i32 = 0xabacad;

static SAMPLE_TOKEN: i32 = SAMPLE_TOKEN_VALUE;

fn sample_token_matches(opaque: *mut c_void) -> bool {
    ptr::eq(opaque.cast_const(), ptr::from_ref(&SAMPLE_TOKEN).cast())
}

unsafe extern "C" fn sample_malloc(size: usize, opaque: *mut c_void) -> *mut c_void {
    if !sample_token_matches(opaque) {
        return ptr::null_mut();
    }
    memsys().heap().allocate(size).cast()
}

unsafe extern "C" fn sample_realloc(
    ptr: *mut c_void,
    size: usize,
    opaque: *mut c_void,
) -> *mut c_void {
    if !sample_token_matches(opaque) {
        return ptr::null_mut();
    }
    // SAFETY: ptr came from sample_malloc, i.e. from the default heap.
    unsafe { memsys().heap().reallocate(ptr.cast(), size).cast() }
}

unsafe extern "C" fn sample_free(ptr: *mut c_void, _opaque: *mut c_void) {
    // SAFETY: ptr came from sample_malloc, i.e. from the default heap.
    unsafe { memsys().heap().free(ptr.cast()) }
}

static SAMPLE_EXTERNAL: ExternalAllocator = ExternalAllocator {
    malloc: sample_malloc,
    realloc: sample_realloc,
    free: sample_free,
    opaque_data: &SAMPLE_TOKEN as *const i32 as *mut c_void,
};

/// Reference external allocator for exercising the external paths.
///
/// Allocation and reallocation forward to the default heap only when the
/// token is the allocator's own token (a static holding
/// [`SAMPLE_TOKEN_VALUE`]); free always forwards. Tokens are compared by
/// address and never dereferenced.
pub fn sample_external_allocator() -> &'static ExternalAllocator {
    &SAMPLE_EXTERNAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serial;

    #[test]
    fn sample_allocates_with_matching_token() {
        let _guard = serial();
        let ext = sample_external_allocator();
        let p = ext.allocate(64);
        assert!(!p.is_null());
        // SAFETY: p came from ext.
        unsafe {
            let q = ext.reallocate(p, 128);
            assert!(!q.is_null());
            ext.free(q);
        }
    }

    #[test]
    fn sample_rejects_foreign_token() {
        let _guard = serial();
        let mut wrong: i32 = 7;
        let ext = ExternalAllocator {
            opaque_data: (&mut wrong as *mut i32).cast(),
            ..*sample_external_allocator()
        };
        assert!(ext.allocate(64).is_null());
    }

    #[test]
    fn sample_rejects_other_token_with_same_value() {
        static LOOKALIKE: i32 = SAMPLE_TOKEN_VALUE;
        let _guard = serial();
        let ext = ExternalAllocator {
            opaque_data: ptr::from_ref(&LOOKALIKE).cast_mut().cast(),
            ..*sample_external_allocator()
        };
        assert!(ext.allocate(16).is_null());
        // SAFETY: a null pointer is never handed to the heap; the token is
        // rejected first.
        assert!(unsafe { ext.reallocate(ptr::null_mut(), 16) }.is_null());
    }

    #[test]
    fn sample_rejects_null_token() {
        let _guard = serial();
        let ext = ExternalAllocator {
            opaque_data: ptr::null_mut(),
            ..*sample_external_allocator()
        };
        assert!(ext.allocate(64).is_null());
    }
}
