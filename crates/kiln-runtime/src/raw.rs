//! Counted allocation wrappers.
//!
//! Every byte the runtime allocates or frees passes through here, so the
//! `alloc`/`free` counters on [`MemSys`](crate::memsys::MemSys) track
//! outstanding raw allocations. Only successful allocations are counted.

use std::ptr::NonNull;

use kiln_core::AllocError;

use crate::external::ExternalAllocator;
use crate::heap::Allocator;
use crate::memsys::memsys;

/// Allocate `size` bytes from the default allocator.
pub fn allocate(size: usize) -> Result<NonNull<u8>, AllocError> {
    allocate_external(size, None)
}

/// Allocate `size` bytes from `external` if given, else the default
/// allocator.
pub fn allocate_external(
    size: usize,
    external: Option<&ExternalAllocator>,
) -> Result<NonNull<u8>, AllocError> {
    let sys = memsys();
    let ptr = match external {
        Some(ext) => ext.allocate(size),
        None => sys.heap().allocate(size),
    };
    let ptr = NonNull::new(ptr).ok_or(AllocError::OutOfMemory { requested: size })?;
    sys.count_alloc();
    kiln_trace!("allocate {:p} size {}", ptr, size);
    Ok(ptr)
}

/// Resize `ptr` through the default allocator. Not counted.
///
/// On failure `ptr` is left untouched and still owned by the caller.
///
/// # Safety
///
/// `ptr` must have come from the default allocator and not been freed.
pub unsafe fn reallocate(ptr: *mut u8, size: usize) -> Result<NonNull<u8>, AllocError> {
    // SAFETY: forwarded caller contract.
    let out = unsafe { memsys().heap().reallocate(ptr, size) };
    NonNull::new(out).ok_or(AllocError::OutOfMemory { requested: size })
}

/// Release `ptr` through the default allocator. Null is a no-op and is not
/// counted.
///
/// # Safety
///
/// `ptr` must be null or have come from the default allocator and not been
/// freed.
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let sys = memsys();
    kiln_trace!("free {:p}", ptr);
    // SAFETY: forwarded caller contract.
    unsafe { sys.heap().free(ptr) };
    sys.count_free();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::sample_external_allocator;
    use crate::test_support::serial;

    #[test]
    fn allocate_and_free_are_counted() {
        let _guard = serial();
        let p = allocate(16).unwrap();
        let stats = memsys().stats();
        assert_eq!((stats.alloc, stats.free), (1, 0));
        // SAFETY: p came from allocate.
        unsafe { free(p.as_ptr()) };
        assert!(memsys().stats().is_balanced());
    }

    #[test]
    fn free_null_is_not_counted() {
        let _guard = serial();
        // SAFETY: null is accepted.
        unsafe { free(std::ptr::null_mut()) };
        assert_eq!(memsys().stats_free(), 0);
    }

    #[test]
    fn reallocate_is_not_counted() {
        let _guard = serial();
        let p = allocate(8).unwrap();
        // SAFETY: p came from the default allocator.
        let q = unsafe { reallocate(p.as_ptr(), 256) }.unwrap();
        assert_eq!(memsys().stats_alloc(), 1);
        // SAFETY: q replaced p.
        unsafe { free(q.as_ptr()) };
        assert!(memsys().stats().is_balanced());
    }

    #[test]
    fn allocate_external_uses_the_given_allocator() {
        let _guard = serial();
        let ext = sample_external_allocator();
        let p = allocate_external(32, Some(ext)).unwrap();
        assert_eq!(memsys().stats_alloc(), 1);
        // SAFETY: p came from ext.
        unsafe { ext.free(p.as_ptr()) };
    }
}
