//! Integration test: handle lifecycle and leak accounting.
//!
//! Exercises every allocation entry point through the public API and
//! checks that destructors run exactly once and that the byte and handle
//! counters balance once every handle is released.

use std::ffi::c_void;
use std::ptr;

use kiln_runtime::{
    manage_memory, memsys, sample_external_allocator, AllocError, Block, BlockKind, BlockRef,
    MemStats, INVALID_REFCOUNT, SYSTEM_HEAP,
};
use kiln_test_utils::fixtures::{
    counting_dtor, counting_element_dtor, counting_managed_dtor, dtor_bytes, dtor_calls,
    element_dtor_calls, managed_dtor_calls, reset_dtor_calls, FAILING,
};
use kiln_test_utils::serial;

#[test]
fn alloc_reports_requested_size() {
    let _guard = serial();
    for size in [0, 1, 7, 64, 4096] {
        let b = BlockRef::alloc(size).unwrap();
        assert_eq!(b.size(), size);
        assert!(b.data_ptr().is_some());
        assert_eq!(b.kind(), BlockKind::Fixed);
    }
    assert!(memsys().stats().is_balanced());
}

#[test]
fn n_acquires_then_n_plus_one_releases_destroy_once() {
    let _guard = serial();
    reset_dtor_calls();
    let b = Block::alloc_dtor(32, Some(counting_dtor)).unwrap();
    const N: usize = 5;
    // SAFETY: b stays live until the final release.
    unsafe {
        for _ in 0..N {
            Block::acquire(b);
        }
        assert_eq!(Block::refcount(b.as_ptr()), N + 1);
        for _ in 0..N {
            Block::release(b);
            assert_eq!(dtor_calls(), 0);
        }
        Block::release(b);
    }
    assert_eq!(dtor_calls(), 1);
    assert_eq!(dtor_bytes(), 32);
    let stats = memsys().stats();
    assert_eq!(stats.handle_alloc, 1);
    assert_eq!(stats.handle_free, 1);
    assert!(stats.is_balanced(), "{stats}");
}

#[test]
fn clones_share_one_destructor_call() {
    let _guard = serial();
    reset_dtor_calls();
    let a = BlockRef::alloc_dtor(8, counting_dtor).unwrap();
    let clones: Vec<_> = (0..10).map(|_| a.clone()).collect();
    assert_eq!(a.refcount(), 11);
    drop(clones);
    assert_eq!(dtor_calls(), 0);
    drop(a);
    assert_eq!(dtor_calls(), 1);
}

#[test]
fn external_allocations_balance() {
    let _guard = serial();
    let ext = sample_external_allocator();
    let plain = BlockRef::alloc_external(100, ext).unwrap();
    let aligned = Block::alloc_safe_aligned_external(100, 32, ext).unwrap();
    assert!(plain.external_allocator().is_some());
    // SAFETY: aligned is live until released.
    unsafe {
        assert_eq!(Block::data(aligned) as usize % 32, 0);
        assert!(ptr::eq(Block::external_allocator(aligned).unwrap(), ext));
        Block::release(aligned);
    }
    drop(plain);
    let stats = memsys().stats();
    assert_eq!((stats.alloc, stats.free), (2, 2));
    assert!(stats.is_balanced(), "{stats}");
}

#[test]
fn managed_memory_runs_host_finalizer() {
    let _guard = serial();
    reset_dtor_calls();
    let mut storage = [0u64; 4];
    let data: *mut c_void = storage.as_mut_ptr().cast();
    let b = manage_memory(data, counting_managed_dtor).unwrap();
    // SAFETY: b is live until released.
    unsafe {
        assert_eq!(Block::size(b), 0);
        assert_eq!(Block::data(b), data);
        Block::release(b);
    }
    assert_eq!(managed_dtor_calls(), 1);
    assert!(memsys().stats().is_balanced());
}

#[test]
fn resizable_size_tracks_last_request() {
    let _guard = serial();
    reset_dtor_calls();
    let b = Block::new_varsize_dtor(4, counting_element_dtor).unwrap();
    // SAFETY: b is live until released.
    unsafe {
        for size in [16, 1, 300, 0, 12] {
            Block::varsize_realloc(b, size).unwrap();
            assert_eq!(Block::size(b), size);
        }
        let old = Block::data(b);
        Block::varsize_free(b, old);
        assert_eq!(Block::refcount(b.as_ptr()), INVALID_REFCOUNT);
        Block::varsize_alloc(b, 77).unwrap();
        assert_eq!(Block::size(b), 77);
        Block::release(b);
    }
    assert_eq!(element_dtor_calls(), 1);
    let stats = memsys().stats();
    assert!(stats.is_balanced(), "{stats}");
}

#[test]
fn shutdown_skips_destructors_but_frees_storage() {
    let _guard = serial();
    reset_dtor_calls();
    let fixed = BlockRef::alloc_dtor(16, counting_dtor).unwrap();
    let varsize = BlockRef::new_varsize_dtor(16, counting_element_dtor).unwrap();
    memsys().shutdown();
    drop(fixed);
    drop(varsize);
    assert_eq!(dtor_calls(), 0);
    assert_eq!(element_dtor_calls(), 0);
    let stats = memsys().stats();
    assert_eq!(stats.handle_free, 2);
    // The resizable payload is only freed by its destructor.
    assert_eq!(stats.outstanding_bytes(), 1);
}

#[test]
fn failing_allocator_surfaces_errors() {
    let _guard = serial();
    memsys().set_allocator(&FAILING);
    assert!(matches!(
        Block::alloc(8),
        Err(AllocError::OutOfMemory { .. })
    ));
    assert!(BlockRef::new_varsize(8).is_err());
    assert!(Block::new(ptr::null_mut(), 0, None, ptr::null_mut()).is_err());
    assert_eq!(memsys().stats(), MemStats::default());
    memsys().set_allocator(&SYSTEM_HEAP);
}

#[test]
fn set_allocator_allowed_when_balanced() {
    let _guard = serial();
    let b = BlockRef::alloc(8).unwrap();
    drop(b);
    memsys().set_allocator(&FAILING);
    memsys().set_allocator(&SYSTEM_HEAP);
    assert!(BlockRef::alloc(8).is_ok());
}

#[test]
fn dump_writes_address_and_refcount() {
    let _guard = serial();
    let a = BlockRef::alloc(8).unwrap();
    let _b = a.clone();
    let mut out = Vec::new();
    // SAFETY: a is live.
    unsafe { Block::dump(a.as_ptr(), &mut out).unwrap() };
    let line = String::from_utf8(out).unwrap();
    assert!(line.starts_with("Block 0x"), "{line}");
    assert!(line.ends_with("refcount 2\n"), "{line}");
}

#[test]
fn safe_alloc_with_logger_installed() {
    let _guard = serial();
    kiln_test_utils::init_logging();
    let b = BlockRef::alloc_safe(8).unwrap();
    drop(b);
    assert!(memsys().stats().is_balanced());
}
