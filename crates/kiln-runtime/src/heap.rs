//! Default allocator bindings.
//!
//! [`Allocator`] is the seam between the runtime and whatever heap backs
//! it. Three implementations ship with the runtime: [`SystemHeap`] (the C
//! heap, the default after `init`), [`HeapFns`] (a `malloc`/`realloc`/`free`
//! triple supplied by a C host) and
//! [`ExternalAllocator`](crate::external::ExternalAllocator) (a per-handle
//! foreign allocator carrying its own token).

use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;

/// Minimum alignment every [`Allocator`] must provide.
///
/// Handle headers live at the start of allocations, so returned memory
/// must at least satisfy the header's alignment.
pub const MIN_ALIGN: usize = std::mem::align_of::<usize>();

/// A raw byte allocator.
///
/// Allocators are identified by address: [`MemSys::set_allocator`]
/// treats two bindings as the same allocator only if they point at the
/// same object, so install long-lived `static` instances. Zero-sized
/// statics may share an address, so an allocator type must not be
/// zero-sized.
///
/// # Safety
///
/// `allocate` and `reallocate` must return either null or a pointer to at
/// least `size` writable bytes aligned to [`MIN_ALIGN`], valid until it is
/// passed to `free` or `reallocate` on the same allocator. `free` must
/// accept every pointer the allocator returned.
///
/// [`MemSys::set_allocator`]: crate::memsys::MemSys::set_allocator
pub unsafe trait Allocator: Send + Sync {
    /// Allocate `size` bytes. Returns null on failure.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Resize the allocation at `ptr` to `size` bytes, moving it if needed.
    /// Returns null on failure, leaving `ptr` untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator and not been freed.
    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// Release the allocation at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator and not been freed.
    unsafe fn free(&self, ptr: *mut u8);
}

/// The C heap (`malloc`/`realloc`/`free`).
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHeap {
    // Gives SYSTEM_HEAP an address of its own.
    _addr: u8,
}

/// Canonical [`SystemHeap`] instance bound by `MemSys::init`.
pub static SYSTEM_HEAP: SystemHeap = SystemHeap { _addr: 0 };

const _: () = assert!(std::mem::size_of::<SystemHeap>() != 0);

// SAFETY: malloc/realloc return null or max_align_t-aligned memory, which
// covers MIN_ALIGN. Zero-byte requests are bumped to one byte so a
// non-null result is always a distinct live allocation.
unsafe impl Allocator for SystemHeap {
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(size.max(1)).cast() }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: ptr came from malloc/realloc per the caller contract.
        unsafe { libc::realloc(ptr.cast(), size.max(1)).cast() }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: ptr came from malloc/realloc per the caller contract.
        unsafe { libc::free(ptr.cast()) }
    }
}

/// `malloc`-compatible entry point supplied by a C host.
pub type MallocFn = unsafe extern "C" fn(size: usize) -> *mut c_void;
/// `realloc`-compatible entry point supplied by a C host.
pub type ReallocFn = unsafe extern "C" fn(ptr: *mut c_void, size: usize) -> *mut c_void;
/// `free`-compatible entry point supplied by a C host.
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_void);

/// An allocator triple supplied by a C host.
///
/// Two `HeapFns` compare equal when all three function pointers match.
/// Size 0 is never passed to the host: `malloc(0)` may return null and
/// `realloc(p, 0)` may free `p`, so both are asked for one byte instead.
#[derive(Clone, Copy)]
pub struct HeapFns {
    /// Allocation entry point.
    pub malloc: MallocFn,
    /// Reallocation entry point.
    pub realloc: ReallocFn,
    /// Deallocation entry point.
    pub free: FreeFn,
}

impl HeapFns {
    /// The C library's own triple.
    pub const fn libc() -> Self {
        Self {
            malloc: libc::malloc,
            realloc: libc::realloc,
            free: libc::free,
        }
    }
}

impl PartialEq for HeapFns {
    fn eq(&self, other: &Self) -> bool {
        ptr::fn_addr_eq(self.malloc, other.malloc)
            && ptr::fn_addr_eq(self.realloc, other.realloc)
            && ptr::fn_addr_eq(self.free, other.free)
    }
}

impl Eq for HeapFns {}

impl Hash for HeapFns {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.malloc as usize).hash(state);
        (self.realloc as usize).hash(state);
        (self.free as usize).hash(state);
    }
}

impl fmt::Debug for HeapFns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapFns")
            .field("malloc", &(self.malloc as *const ()))
            .field("realloc", &(self.realloc as *const ()))
            .field("free", &(self.free as *const ()))
            .finish()
    }
}

// SAFETY: the host guarantees its triple behaves like malloc/realloc/free;
// that contract is what installing it through the C ABI asserts.
unsafe impl Allocator for HeapFns {
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: the host's malloc has no preconditions.
        unsafe { (self.malloc)(size.max(1)).cast() }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: ptr came from this triple per the caller contract.
        unsafe { (self.realloc)(ptr.cast(), size.max(1)).cast() }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: ptr came from this triple per the caller contract.
        unsafe { (self.free)(ptr.cast()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_heap_zero_size_is_non_null() {
        let p = SYSTEM_HEAP.allocate(0);
        assert!(!p.is_null());
        assert_eq!(p as usize % MIN_ALIGN, 0);
        // SAFETY: p came from SYSTEM_HEAP.
        unsafe { SYSTEM_HEAP.free(p) };
    }

    #[test]
    fn system_heap_is_distinct_from_other_allocators() {
        static OTHER: HeapFns = HeapFns::libc();
        assert_ne!(std::mem::size_of_val(&SYSTEM_HEAP), 0);
        assert!(!ptr::addr_eq(
            &SYSTEM_HEAP as &dyn Allocator,
            &OTHER as &dyn Allocator
        ));
    }

    #[test]
    fn system_heap_realloc_preserves_prefix() {
        let p = SYSTEM_HEAP.allocate(4);
        assert!(!p.is_null());
        // SAFETY: p points to 4 writable bytes; q to at least 64.
        unsafe {
            std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), p, 4);
            let q = SYSTEM_HEAP.reallocate(p, 64);
            assert!(!q.is_null());
            assert_eq!(std::slice::from_raw_parts(q, 4), &[1, 2, 3, 4]);
            SYSTEM_HEAP.free(q);
        }
    }

    #[test]
    fn libc_triple_equals_itself() {
        assert_eq!(HeapFns::libc(), HeapFns::libc());
    }

    #[test]
    fn triples_differing_in_one_entry_are_distinct() {
        unsafe extern "C" fn other_free(ptr: *mut c_void) {
            // SAFETY: forwarded.
            unsafe { libc::free(ptr) }
        }
        let other = HeapFns {
            free: other_free,
            ..HeapFns::libc()
        };
        assert_ne!(other, HeapFns::libc());
    }

    #[test]
    fn heap_fns_never_pass_zero_to_the_host() {
        let heap = HeapFns::libc();
        let p = heap.allocate(0);
        assert!(!p.is_null());
        // SAFETY: p came from heap; realloc to 0 keeps a live allocation.
        unsafe {
            let q = heap.reallocate(p, 0);
            assert!(!q.is_null());
            heap.free(q);
        }
    }

    #[test]
    fn heap_fns_allocate_and_free() {
        let heap = HeapFns::libc();
        let p = heap.allocate(32);
        assert!(!p.is_null());
        // SAFETY: p came from heap.
        unsafe { heap.free(p) };
    }
}
