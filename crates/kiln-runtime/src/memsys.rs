//! The process-wide runtime configuration.
//!
//! Exactly one [`MemSys`] exists per process (reached through [`memsys`]).
//! It holds the active default allocator, the active atomic primitives,
//! the shutdown flag and the leak-detection counters. Generated code and
//! every other module read it; only the host reconfigures it.
//!
//! # Lifecycle
//!
//! 1. [`MemSys::init`] once at process start.
//! 2. Optionally [`MemSys::set_allocator`], [`MemSys::set_atomic_inc_dec`],
//!    [`MemSys::set_atomic_cas`].
//! 3. [`MemSys::shutdown`] once at process end.
//!
//! Reconfiguration is not serialised against in-flight allocation. Callers
//! must make sure no other thread is allocating or releasing while they
//! install a new allocator or new primitives.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use kiln_core::{ContractViolation, MemStats};

use crate::atomics::{AtomicCas, AtomicIncDec, STUB_ATOMICS};
use crate::fatal::fatal;
use crate::heap::{Allocator, SYSTEM_HEAP};

#[derive(Clone, Copy)]
struct Bindings {
    heap: &'static dyn Allocator,
    inc_dec: &'static dyn AtomicIncDec,
    cas: &'static dyn AtomicCas,
}

impl Bindings {
    const DEFAULT: Bindings = Bindings {
        heap: &SYSTEM_HEAP,
        inc_dec: &STUB_ATOMICS,
        cas: &STUB_ATOMICS,
    };
}

/// Runtime configuration and leak-detection counters.
pub struct MemSys {
    bindings: RwLock<Bindings>,
    shutting: AtomicBool,
    stats_alloc: AtomicUsize,
    stats_free: AtomicUsize,
    stats_handle_alloc: AtomicUsize,
    stats_handle_free: AtomicUsize,
}

static MEMSYS: MemSys = MemSys::new();

/// The process-wide [`MemSys`].
pub fn memsys() -> &'static MemSys {
    &MEMSYS
}

impl MemSys {
    const fn new() -> Self {
        Self {
            bindings: RwLock::new(Bindings::DEFAULT),
            shutting: AtomicBool::new(false),
            stats_alloc: AtomicUsize::new(0),
            stats_free: AtomicUsize::new(0),
            stats_handle_alloc: AtomicUsize::new(0),
            stats_handle_free: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> Bindings {
        *self.bindings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Bindings> {
        self.bindings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the runtime: zero the counters, clear the shutdown flag, bind
    /// the C heap and the non-atomic stand-in primitives.
    pub fn init(&self) {
        *self.write() = Bindings::DEFAULT;
        self.shutting.store(false, Ordering::SeqCst);
        self.stats_alloc.store(0, Ordering::SeqCst);
        self.stats_free.store(0, Ordering::SeqCst);
        self.stats_handle_alloc.store(0, Ordering::SeqCst);
        self.stats_handle_free.store(0, Ordering::SeqCst);
        kiln_trace!("memsys init");
    }

    /// Mark the runtime as shutting down.
    ///
    /// From now on destructors are skipped when handles die (their effects
    /// may reference an already torn-down host), and both atomic slots are
    /// forced back to the non-atomic stand-ins because the host's
    /// primitives may be unloaded. Only valid once no other thread uses the
    /// runtime.
    pub fn shutdown(&self) {
        self.shutting.store(true, Ordering::SeqCst);
        self.set_atomic_inc_dec_stub();
        self.set_atomic_cas_stub();
        kiln_trace!("memsys shutdown");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called since the last
    /// [`init`](Self::init).
    pub fn is_shutting_down(&self) -> bool {
        self.shutting.load(Ordering::Acquire)
    }

    /// Replace the default allocator.
    ///
    /// Re-installing the current allocator is always allowed. Installing a
    /// different one while any raw allocation or handle is outstanding
    /// would mix blocks from incompatible heaps, so it aborts the process.
    pub fn set_allocator(&self, heap: &'static dyn Allocator) {
        let mut bindings = self.write();
        if !ptr::addr_eq(bindings.heap, heap) {
            let stats = self.stats();
            if !stats.is_balanced() {
                fatal(ContractViolation::AllocatorSwapWithOutstanding {
                    outstanding_bytes: stats.outstanding_bytes(),
                    outstanding_handles: stats.outstanding_handles(),
                });
            }
        }
        bindings.heap = heap;
        kiln_trace!("memsys set_allocator");
    }

    /// Install increment/decrement primitives.
    pub fn set_atomic_inc_dec(&self, ops: &'static dyn AtomicIncDec) {
        self.write().inc_dec = ops;
    }

    /// Install a compare-and-swap primitive.
    pub fn set_atomic_cas(&self, ops: &'static dyn AtomicCas) {
        self.write().cas = ops;
    }

    /// Reinstall the non-atomic increment/decrement stand-ins.
    pub fn set_atomic_inc_dec_stub(&self) {
        self.set_atomic_inc_dec(&STUB_ATOMICS);
    }

    /// Reinstall the non-atomic compare-and-swap stand-in.
    pub fn set_atomic_cas_stub(&self) {
        self.set_atomic_cas(&STUB_ATOMICS);
    }

    /// The active default allocator.
    pub fn heap(&self) -> &'static dyn Allocator {
        self.read().heap
    }

    /// Compare-and-swap `slot` through the installed primitive.
    pub fn atomic_cas(
        &self,
        slot: &AtomicPtr<c_void>,
        current: *mut c_void,
        new: *mut c_void,
    ) -> Result<*mut c_void, *mut c_void> {
        self.read().cas.compare_and_swap(slot, current, new)
    }

    pub(crate) fn increment(&self, word: &AtomicUsize) -> usize {
        self.read().inc_dec.increment(word)
    }

    pub(crate) fn decrement(&self, word: &AtomicUsize) -> usize {
        self.read().inc_dec.decrement(word)
    }

    pub(crate) fn count_alloc(&self) {
        self.increment(&self.stats_alloc);
    }

    pub(crate) fn count_free(&self) {
        self.increment(&self.stats_free);
    }

    pub(crate) fn count_handle_alloc(&self) {
        self.increment(&self.stats_handle_alloc);
    }

    pub(crate) fn count_handle_free(&self) {
        self.increment(&self.stats_handle_free);
    }

    /// Raw allocations made through the allocation wrappers.
    pub fn stats_alloc(&self) -> usize {
        self.stats_alloc.load(Ordering::Acquire)
    }

    /// Raw frees made through the allocation wrappers or handle teardown.
    pub fn stats_free(&self) -> usize {
        self.stats_free.load(Ordering::Acquire)
    }

    /// Handles initialised.
    pub fn stats_handle_alloc(&self) -> usize {
        self.stats_handle_alloc.load(Ordering::Acquire)
    }

    /// Handles destroyed.
    pub fn stats_handle_free(&self) -> usize {
        self.stats_handle_free.load(Ordering::Acquire)
    }

    /// Snapshot of all four counters.
    pub fn stats(&self) -> MemStats {
        MemStats {
            alloc: self.stats_alloc(),
            free: self.stats_free(),
            handle_alloc: self.stats_handle_alloc(),
            handle_free: self.stats_handle_free(),
        }
    }
}
