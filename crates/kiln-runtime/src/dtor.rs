//! Destructor adapters.
//!
//! Each adapter is an `extern "C"` [`DtorFn`] installed as the handle's
//! destructor. The caller's own finalizer (or the payload size, for the
//! safe aligned variant) travels in the handle's info word and is
//! recovered here.

use std::ffi::c_void;
use std::mem;
use std::ptr;

use kiln_core::{poison, AllocError};

use crate::block::{Block, BlockPtr, DtorFn};

/// Finalizer for memory the runtime did not allocate.
pub type ManagedDtorFn = unsafe extern "C" fn(data: *mut c_void);

type BoxedFinalizer = Box<dyn FnOnce(*mut u8, usize) + Send>;

pub(crate) fn dtor_to_info(dtor: Option<DtorFn>) -> *mut c_void {
    dtor.map_or(ptr::null_mut(), |f| f as *mut c_void)
}

/// # Safety
///
/// `info` must be null or have come from [`dtor_to_info`].
pub(crate) unsafe fn info_to_dtor(info: *mut c_void) -> Option<DtorFn> {
    // SAFETY: Option<fn> has the null niche; non-null values were fn
    // pointers of this exact type.
    unsafe { mem::transmute::<*mut c_void, Option<DtorFn>>(info) }
}

pub(crate) fn finalizer_to_info(f: Option<ManagedDtorFn>) -> *mut c_void {
    f.map_or(ptr::null_mut(), |f| f as *mut c_void)
}

/// # Safety
///
/// `info` must be null or have come from [`finalizer_to_info`].
pub(crate) unsafe fn info_to_finalizer(info: *mut c_void) -> Option<ManagedDtorFn> {
    // SAFETY: as for info_to_dtor.
    unsafe { mem::transmute::<*mut c_void, Option<ManagedDtorFn>>(info) }
}

pub(crate) fn size_to_info(size: usize) -> *mut c_void {
    ptr::without_provenance_mut(size)
}

/// Forward to the caller's destructor stored in `info`.
pub(crate) unsafe extern "C" fn custom_dtor(data: *mut c_void, size: usize, info: *mut c_void) {
    kiln_trace!("custom_dtor {:p}, {:p}", data, info);
    // SAFETY: info was built by dtor_to_info.
    if let Some(dtor) = unsafe { info_to_dtor(info) } {
        // SAFETY: the caller registered dtor for this payload.
        unsafe { dtor(data, size, ptr::null_mut()) };
    }
}

/// [`custom_dtor`], then poison the payload.
pub(crate) unsafe extern "C" fn custom_dtor_safe(
    data: *mut c_void,
    size: usize,
    info: *mut c_void,
) {
    kiln_trace!("custom_dtor_safe {:p}, {:p}", data, info);
    // SAFETY: forwarded; data spans size bytes.
    unsafe {
        custom_dtor(data, size, info);
        poison_freed(data, size);
    }
}

/// Poison the payload; its size is carried in `info`.
pub(crate) unsafe extern "C" fn dtor_safe(data: *mut c_void, _size: usize, info: *mut c_void) {
    kiln_trace!("dtor_safe {:p}, {:p}", data, info);
    // SAFETY: info holds the payload size the handle was created with.
    unsafe { poison_freed(data, info.addr()) };
}

unsafe fn poison_freed(data: *mut c_void, size: usize) {
    // SAFETY: data spans size writable bytes per the caller contract.
    unsafe { ptr::write_bytes(data.cast::<u8>(), poison::FREED, size) };
}

unsafe extern "C" fn managed_dtor(data: *mut c_void, _size: usize, info: *mut c_void) {
    // SAFETY: info was built by finalizer_to_info.
    if let Some(f) = unsafe { info_to_finalizer(info) } {
        // SAFETY: the host registered f for data.
        unsafe { f(data) };
    }
}

/// Hand foreign memory to the runtime.
///
/// The handle has size 0 and a header allocated by the runtime; when the
/// last reference goes, `dtor(data)` runs and only the header is freed.
pub fn manage_memory(data: *mut c_void, dtor: ManagedDtorFn) -> Result<BlockPtr, AllocError> {
    Block::new(data, 0, Some(managed_dtor), finalizer_to_info(Some(dtor)))
}

unsafe extern "C" fn boxed_dtor(data: *mut c_void, size: usize, info: *mut c_void) {
    // SAFETY: info is the leaked box from alloc_with_finalizer, reclaimed
    // exactly once here.
    let f = unsafe { Box::from_raw(info.cast::<BoxedFinalizer>()) };
    f(data.cast(), size);
}

impl Block {
    /// Combined allocation running a Rust closure on the payload when the
    /// last reference goes.
    ///
    /// The closure lives in the info word, so [`Block::parent`] returns
    /// its box rather than a caller value. During shutdown destructors are
    /// skipped and the closure is leaked. A panic inside it aborts.
    pub fn alloc_with_finalizer<F>(size: usize, finalizer: F) -> Result<BlockPtr, AllocError>
    where
        F: FnOnce(*mut u8, usize) + Send + 'static,
    {
        let boxed: Box<BoxedFinalizer> = Box::new(Box::new(finalizer));
        let info = Box::into_raw(boxed).cast::<c_void>();
        match Block::alloc(size) {
            Ok(b) => {
                // SAFETY: b is fresh and not yet shared.
                unsafe { Block::set_dtor(b, Some(boxed_dtor), info) };
                Ok(b)
            }
            Err(e) => {
                // SAFETY: info was just leaked above and never shared.
                drop(unsafe { Box::from_raw(info.cast::<BoxedFinalizer>()) });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memsys::memsys;
    use crate::test_support::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    static SEEN: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn record_size(_data: *mut c_void, size: usize, info: *mut c_void) {
        assert!(info.is_null());
        SEEN.store(size, Ordering::SeqCst);
    }

    unsafe extern "C" fn record_managed(data: *mut c_void) {
        SEEN.store(data.addr(), Ordering::SeqCst);
    }

    #[test]
    fn dtor_info_round_trips() {
        let info = dtor_to_info(Some(record_size));
        // SAFETY: info came from dtor_to_info.
        let back = unsafe { info_to_dtor(info) };
        assert_eq!(back.map(|f| f as usize), Some(record_size as usize));
        // SAFETY: null is accepted.
        assert!(unsafe { info_to_dtor(ptr::null_mut()) }.is_none());
    }

    #[test]
    fn custom_dtor_passes_null_info() {
        let _guard = serial();
        SEEN.store(0, Ordering::SeqCst);
        let b = Block::alloc_dtor(12, Some(record_size)).unwrap();
        // SAFETY: last reference.
        unsafe { Block::release(b) };
        assert_eq!(SEEN.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn custom_dtor_safe_poisons_after_caller_dtor() {
        let mut buf = [0u8; 8];
        // SAFETY: buf spans 8 bytes.
        unsafe {
            custom_dtor_safe(
                buf.as_mut_ptr().cast(),
                buf.len(),
                dtor_to_info(Some(record_size)),
            )
        };
        assert_eq!(buf, [poison::FREED; 8]);
    }

    #[test]
    fn dtor_safe_reads_size_from_info() {
        let mut buf = [0u8; 8];
        // SAFETY: 4 bytes of buf are poisoned.
        unsafe { dtor_safe(buf.as_mut_ptr().cast(), 999, size_to_info(4)) };
        assert_eq!(buf, [0xDE, 0xDE, 0xDE, 0xDE, 0, 0, 0, 0]);
    }

    #[test]
    fn manage_memory_runs_finalizer_on_data() {
        let _guard = serial();
        SEEN.store(0, Ordering::SeqCst);
        let data: *mut c_void = ptr::without_provenance_mut(0x1000);
        let b = manage_memory(data, record_managed).unwrap();
        // SAFETY: b is live until released.
        unsafe {
            assert_eq!(Block::size(b), 0);
            assert_eq!(Block::data(b), data);
            Block::release(b);
        }
        assert_eq!(SEEN.load(Ordering::SeqCst), 0x1000);
        assert!(memsys().stats().is_balanced());
    }

    #[test]
    fn closure_finalizer_sees_payload_and_size() {
        let _guard = serial();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let b = Block::alloc_with_finalizer(20, move |data, size| {
            assert!(!data.is_null());
            seen.fetch_add(size, Ordering::SeqCst);
        })
        .unwrap();
        // SAFETY: b is live until released.
        unsafe {
            Block::acquire(b);
            Block::release(b);
            assert_eq!(hits.load(Ordering::SeqCst), 0);
            Block::release(b);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 20);
        assert_eq!(Arc::strong_count(&hits), 1);
    }
}
