//! Destructor and allocator fixtures.
//!
//! - Counting destructors: `extern "C"` functions bumping static counters,
//!   reset with [`reset_dtor_calls`].
//! - [`QuarantineHeap`]: delays every free so poison written by a safe
//!   destructor can still be read after the handle is gone.
//! - [`FailingHeap`]: always returns null.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use kiln_runtime::{Allocator, SYSTEM_HEAP};

static DTOR_CALLS: AtomicUsize = AtomicUsize::new(0);
static DTOR_BYTES: AtomicUsize = AtomicUsize::new(0);
static ELEMENT_CALLS: AtomicUsize = AtomicUsize::new(0);
static MANAGED_CALLS: AtomicUsize = AtomicUsize::new(0);

/// Handle destructor counting calls and payload bytes.
pub unsafe extern "C" fn counting_dtor(_data: *mut c_void, size: usize, _info: *mut c_void) {
    DTOR_CALLS.fetch_add(1, Ordering::SeqCst);
    DTOR_BYTES.fetch_add(size, Ordering::SeqCst);
}

/// Element finalizer for resizable handles.
pub unsafe extern "C" fn counting_element_dtor(_data: *mut c_void) {
    ELEMENT_CALLS.fetch_add(1, Ordering::SeqCst);
}

/// Finalizer for managed foreign memory.
pub unsafe extern "C" fn counting_managed_dtor(_data: *mut c_void) {
    MANAGED_CALLS.fetch_add(1, Ordering::SeqCst);
}

pub fn dtor_calls() -> usize {
    DTOR_CALLS.load(Ordering::SeqCst)
}

pub fn dtor_bytes() -> usize {
    DTOR_BYTES.load(Ordering::SeqCst)
}

pub fn element_dtor_calls() -> usize {
    ELEMENT_CALLS.load(Ordering::SeqCst)
}

pub fn managed_dtor_calls() -> usize {
    MANAGED_CALLS.load(Ordering::SeqCst)
}

/// Zero every destructor counter.
pub fn reset_dtor_calls() {
    DTOR_CALLS.store(0, Ordering::SeqCst);
    DTOR_BYTES.store(0, Ordering::SeqCst);
    ELEMENT_CALLS.store(0, Ordering::SeqCst);
    MANAGED_CALLS.store(0, Ordering::SeqCst);
}

/// System heap whose frees are held back until [`drain`](Self::drain).
pub struct QuarantineHeap {
    held: Mutex<Vec<usize>>,
}

pub static QUARANTINE: QuarantineHeap = QuarantineHeap {
    held: Mutex::new(Vec::new()),
};

impl QuarantineHeap {
    /// Number of frees currently held back.
    pub fn held(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether `ptr` was freed and is still held back.
    pub fn is_held(&self, ptr: *const u8) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(ptr as usize))
    }

    /// Release every held allocation to the system heap.
    pub fn drain(&self) {
        let held = std::mem::take(&mut *self.held.lock().unwrap_or_else(PoisonError::into_inner));
        for addr in held {
            // SAFETY: addr came from SYSTEM_HEAP through allocate/reallocate
            // and was freed exactly once by the runtime.
            unsafe { SYSTEM_HEAP.free(addr as *mut u8) };
        }
    }
}

// SAFETY: delegates allocation to SYSTEM_HEAP; held memory stays valid
// until drained.
unsafe impl Allocator for QuarantineHeap {
    fn allocate(&self, size: usize) -> *mut u8 {
        SYSTEM_HEAP.allocate(size)
    }

    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: ptr came from SYSTEM_HEAP.
        unsafe { SYSTEM_HEAP.reallocate(ptr, size) }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ptr as usize);
    }
}

/// Allocator that never succeeds.
pub struct FailingHeap {
    _addr: u8,
}

pub static FAILING: FailingHeap = FailingHeap { _addr: 0 };

// SAFETY: never hands out memory, so there is nothing to free.
unsafe impl Allocator for FailingHeap {
    fn allocate(&self, _size: usize) -> *mut u8 {
        std::ptr::null_mut()
    }

    unsafe fn reallocate(&self, _ptr: *mut u8, _size: usize) -> *mut u8 {
        std::ptr::null_mut()
    }

    unsafe fn free(&self, _ptr: *mut u8) {}
}
