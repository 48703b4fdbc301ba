//! Pluggable atomic primitives.
//!
//! The runtime never decides how the refcount word is synchronised. It
//! calls whatever [`AtomicIncDec`] and [`AtomicCas`] bindings are installed
//! on [`MemSys`](crate::memsys::MemSys):
//!
//! - [`StubAtomics`]: separate load and store, correct only when a single
//!   thread touches the runtime. Installed by `init` and forced back by
//!   `shutdown`.
//! - [`HostAtomics`]: read-modify-write on `std::sync::atomic` types, for
//!   Rust hosts.
//! - [`ExternAtomics`] / [`ExternCas`]: function pointers handed over by a
//!   C host.
//!
//! Words are stored as `AtomicUsize` / `AtomicPtr` so every implementation,
//! including the non-atomic stand-in, touches them without data races at
//! the language level. The stand-in can still lose updates under real
//! concurrency.

use std::ffi::{c_int, c_void};
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Increment/decrement primitive pair for refcounts and statistics.
pub trait AtomicIncDec: Send + Sync {
    /// Add one to `word` and return the new value.
    fn increment(&self, word: &AtomicUsize) -> usize;

    /// Subtract one from `word` and return the new value.
    fn decrement(&self, word: &AtomicUsize) -> usize;
}

/// Compare-and-swap primitive on a pointer slot.
pub trait AtomicCas: Send + Sync {
    /// If `slot` holds `current`, store `new`.
    ///
    /// Returns `Ok(previous)` on success and `Err(actual)` otherwise, like
    /// [`AtomicPtr::compare_exchange`].
    fn compare_and_swap(
        &self,
        slot: &AtomicPtr<c_void>,
        current: *mut c_void,
        new: *mut c_void,
    ) -> Result<*mut c_void, *mut c_void>;
}

/// Non-atomic stand-in primitives.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubAtomics;

/// Shared [`StubAtomics`] instance.
pub static STUB_ATOMICS: StubAtomics = StubAtomics;

impl AtomicIncDec for StubAtomics {
    fn increment(&self, word: &AtomicUsize) -> usize {
        let out = word.load(Ordering::Relaxed).wrapping_add(1);
        word.store(out, Ordering::Relaxed);
        out
    }

    fn decrement(&self, word: &AtomicUsize) -> usize {
        let out = word.load(Ordering::Relaxed).wrapping_sub(1);
        word.store(out, Ordering::Relaxed);
        out
    }
}

impl AtomicCas for StubAtomics {
    fn compare_and_swap(
        &self,
        slot: &AtomicPtr<c_void>,
        current: *mut c_void,
        new: *mut c_void,
    ) -> Result<*mut c_void, *mut c_void> {
        let old = slot.load(Ordering::Relaxed);
        if old == current {
            slot.store(new, Ordering::Relaxed);
            Ok(old)
        } else {
            Err(old)
        }
    }
}

/// Real atomic primitives for Rust hosts.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostAtomics;

/// Shared [`HostAtomics`] instance.
pub static HOST_ATOMICS: HostAtomics = HostAtomics;

impl AtomicIncDec for HostAtomics {
    fn increment(&self, word: &AtomicUsize) -> usize {
        word.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn decrement(&self, word: &AtomicUsize) -> usize {
        // AcqRel: the thread that observes zero must see every write made
        // through other references before it runs the destructor.
        word.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1)
    }
}

impl AtomicCas for HostAtomics {
    fn compare_and_swap(
        &self,
        slot: &AtomicPtr<c_void>,
        current: *mut c_void,
        new: *mut c_void,
    ) -> Result<*mut c_void, *mut c_void> {
        slot.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// C increment or decrement primitive: updates `*ptr`, returns the new value.
pub type IncDecFn = unsafe extern "C" fn(ptr: *mut usize) -> usize;

/// C compare-and-swap primitive.
///
/// Stores `repl` into `*ptr` if it equals `cmp`, writes the previous value
/// to `*oldptr`, and returns non-zero on success.
pub type CasFn = unsafe extern "C" fn(
    ptr: *mut *mut c_void,
    cmp: *mut c_void,
    repl: *mut c_void,
    oldptr: *mut *mut c_void,
) -> c_int;

/// Increment/decrement pair supplied by a C host.
///
/// Equality and hashing use the function addresses.
#[derive(Clone, Copy, Debug)]
pub struct ExternAtomics {
    /// Increment entry point.
    pub inc: IncDecFn,
    /// Decrement entry point.
    pub dec: IncDecFn,
}

impl AtomicIncDec for ExternAtomics {
    fn increment(&self, word: &AtomicUsize) -> usize {
        // SAFETY: the pointer is valid and aligned for the duration of the
        // call; the host primitive performs the update on it.
        unsafe { (self.inc)(word.as_ptr()) }
    }

    fn decrement(&self, word: &AtomicUsize) -> usize {
        // SAFETY: as for `increment`.
        unsafe { (self.dec)(word.as_ptr()) }
    }
}

impl PartialEq for ExternAtomics {
    fn eq(&self, other: &Self) -> bool {
        ptr::fn_addr_eq(self.inc, other.inc) && ptr::fn_addr_eq(self.dec, other.dec)
    }
}

impl Eq for ExternAtomics {}

impl Hash for ExternAtomics {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.inc as usize).hash(state);
        (self.dec as usize).hash(state);
    }
}

/// Compare-and-swap primitive supplied by a C host.
///
/// Equality and hashing use the function address.
#[derive(Clone, Copy, Debug)]
pub struct ExternCas {
    /// Compare-and-swap entry point.
    pub cas: CasFn,
}

impl PartialEq for ExternCas {
    fn eq(&self, other: &Self) -> bool {
        ptr::fn_addr_eq(self.cas, other.cas)
    }
}

impl Eq for ExternCas {}

impl Hash for ExternCas {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.cas as usize).hash(state);
    }
}

impl AtomicCas for ExternCas {
    fn compare_and_swap(
        &self,
        slot: &AtomicPtr<c_void>,
        current: *mut c_void,
        new: *mut c_void,
    ) -> Result<*mut c_void, *mut c_void> {
        let mut old = ptr::null_mut();
        // SAFETY: both pointers are valid for the duration of the call.
        let swapped = unsafe { (self.cas)(slot.as_ptr(), current, new, &mut old) };
        if swapped != 0 {
            Ok(old)
        } else {
            Err(old)
        }
    }
}
