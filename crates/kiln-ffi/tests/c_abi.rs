//! Integration test: drive the runtime only through its C entry points,
//! the way a host and its generated code would.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use kiln_ffi::block::*;
use kiln_ffi::memsys::*;
use kiln_ffi::raw::*;
use kiln_ffi::{kiln_get_api, KilnApiFunctions};
use kiln_runtime::HeapFns;
use kiln_test_utils::fixtures::{
    counting_dtor, counting_element_dtor, dtor_calls, element_dtor_calls, reset_dtor_calls,
};
use kiln_test_utils::{assert_aborted, in_child, run_in_child, serial};

static LIBC: HeapFns = HeapFns::libc();
static HOST_MALLOCS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn host_malloc(size: usize) -> *mut c_void {
    HOST_MALLOCS.fetch_add(1, Ordering::SeqCst);
    // SAFETY: plain libc call.
    unsafe { (LIBC.malloc)(size) }
}

unsafe extern "C" fn host_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: ptr came from host_malloc.
    unsafe { (LIBC.realloc)(ptr, size) }
}

unsafe extern "C" fn host_free(ptr: *mut c_void) {
    // SAFETY: ptr came from host_malloc or host_realloc.
    unsafe { (LIBC.free)(ptr) }
}

fn api() -> &'static KilnApiFunctions {
    // SAFETY: the table is a static.
    unsafe { &*kiln_get_api() }
}

fn assert_balanced() {
    assert_eq!(kiln_memsys_get_stats_alloc(), kiln_memsys_get_stats_free());
    assert_eq!(
        kiln_memsys_get_stats_handle_alloc(),
        kiln_memsys_get_stats_handle_free()
    );
}

#[test]
fn host_allocator_serves_every_allocation() {
    let _guard = serial();
    kiln_memsys_init();
    HOST_MALLOCS.store(0, Ordering::SeqCst);
    kiln_memsys_set_allocator(host_malloc, host_realloc, host_free);

    let a = (api().allocate)(64);
    let b = kiln_block_alloc_safe_aligned(64, 32);
    let v = kiln_block_new_varsize(8);
    assert!(!a.is_null() && !b.is_null() && !v.is_null());
    assert_eq!(HOST_MALLOCS.load(Ordering::SeqCst), 4);

    kiln_block_varsize_realloc(v, 256);
    (api().release)(a);
    kiln_block_release(b);
    kiln_block_release(v);
    assert_balanced();
}

#[test]
fn sample_external_allocator_round_trip() {
    let _guard = serial();
    kiln_memsys_init();
    let ext = kiln_sample_external_allocator();
    let b = (api().allocate_external)(40, ext);
    assert_eq!(kiln_block_external_allocator(b), ext);
    assert_eq!(kiln_block_size(b), 40);
    kiln_block_acquire(b);
    assert_eq!(kiln_block_refcount(b), 2);
    kiln_block_release(b);
    kiln_block_release(b);

    let raw = kiln_allocate_external(24, ext);
    assert!(!raw.is_null());
    kiln_free(raw);
    assert_balanced();
}

#[test]
fn destructors_run_once_through_c_abi() {
    let _guard = serial();
    kiln_memsys_init();
    reset_dtor_calls();
    let b = kiln_block_alloc_dtor_safe(16, Some(counting_dtor));
    let v = kiln_block_new_varsize_dtor(16, counting_element_dtor);
    for _ in 0..3 {
        kiln_block_acquire(b);
        kiln_block_acquire(v);
    }
    for _ in 0..4 {
        kiln_block_release(b);
        kiln_block_release(v);
    }
    assert_eq!(dtor_calls(), 1);
    assert_eq!(element_dtor_calls(), 1);
    assert_balanced();
}

#[test]
fn shutdown_skips_destructors() {
    let _guard = serial();
    kiln_memsys_init();
    reset_dtor_calls();
    let b = kiln_block_alloc_dtor(8, Some(counting_dtor));
    kiln_memsys_shutdown();
    kiln_block_release(b);
    assert_eq!(dtor_calls(), 0);
    assert_eq!(kiln_memsys_get_stats_handle_free(), 1);
    kiln_memsys_init();
}

#[test]
fn managed_memory_keeps_foreign_payload() {
    let _guard = serial();
    kiln_memsys_init();
    let mut foreign = vec![7u8; 12];
    let data: *mut c_void = foreign.as_mut_ptr().cast();
    extern "C" fn ignore(_data: *mut c_void) {}
    let b = kiln_manage_memory(data, ignore);
    assert_eq!(kiln_block_data(b), data);
    assert_eq!(kiln_block_size(b), 0);
    kiln_block_release(b);
    assert_eq!(foreign, vec![7u8; 12]);
    assert_balanced();
}

#[test]
fn null_external_pointer_selects_default_heap() {
    let _guard = serial();
    kiln_memsys_init();
    let p = kiln_allocate_external(8, ptr::null());
    let p = kiln_reallocate(p, 4096);
    assert!(!p.is_null());
    kiln_free(p);
    assert_balanced();
}

#[test]
fn host_sized_header_storage() {
    let _guard = serial();
    kiln_memsys_init();
    reset_dtor_calls();
    let storage = kiln_allocate(kiln_block_header_size());
    let b: *mut kiln_runtime::Block = storage.cast();
    let mut payload = [0u8; 16];
    kiln_block_init(
        b,
        payload.as_mut_ptr().cast(),
        payload.len(),
        Some(counting_dtor),
        ptr::null_mut(),
        ptr::null(),
    );
    assert_eq!(kiln_block_refcount(b), 1);
    assert_eq!(kiln_block_size(b), 16);
    kiln_block_release(b);
    assert_eq!(dtor_calls(), 1);
    assert_balanced();
}

#[test]
fn allocator_swap_with_outstanding_handle_aborts() {
    if in_child() {
        let _guard = serial();
        kiln_memsys_init();
        let _held = kiln_block_alloc(8);
        kiln_memsys_set_allocator(host_malloc, host_realloc, host_free);
        unreachable!("allocator swap accepted with an outstanding handle");
    }
    let out = run_in_child("allocator_swap_with_outstanding_handle_aborts");
    assert_aborted(&out, "cannot change allocator while blocks are allocated");
}

#[test]
fn varsize_realloc_through_c_abi_on_fixed_handle_aborts() {
    if in_child() {
        let _guard = serial();
        kiln_memsys_init();
        let b = kiln_block_alloc(8);
        kiln_block_varsize_realloc(b, 64);
        unreachable!("varsize_realloc returned on a fixed handle");
    }
    let out = run_in_child("varsize_realloc_through_c_abi_on_fixed_handle_aborts");
    assert_aborted(&out, "varsize_realloc called with a non-resizable handle");
}
