//! Integration test: poison patterns of the safe allocation variants.
//!
//! Freed handles are held back by the quarantining heap so the payload can
//! still be read after the destructor has run.

use kiln_core::poison::{FREED, UNINIT};
use kiln_runtime::{memsys, Block, SYSTEM_HEAP};
use kiln_test_utils::fixtures::{counting_dtor, dtor_calls, reset_dtor_calls, QUARANTINE};
use kiln_test_utils::serial;

fn payload_bytes<'a>(data: *mut std::ffi::c_void, size: usize) -> &'a [u8] {
    // SAFETY: callers pass a payload of `size` bytes that is either live or
    // held back by the quarantine.
    unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size) }
}

#[test]
fn alloc_dtor_safe_poisons_before_and_after() {
    let _guard = serial();
    reset_dtor_calls();
    memsys().set_allocator(&QUARANTINE);

    let size = 96;
    let b = Block::alloc_dtor_safe(size, Some(counting_dtor)).unwrap();
    // SAFETY: b is live until released.
    let data = unsafe { Block::data(b) };
    assert!(payload_bytes(data, size).iter().all(|&x| x == UNINIT));

    // SAFETY: last reference.
    unsafe { Block::release(b) };
    assert_eq!(dtor_calls(), 1);
    assert!(QUARANTINE.is_held(b.as_ptr().cast()));
    assert!(payload_bytes(data, size).iter().all(|&x| x == FREED));

    QUARANTINE.drain();
    assert!(memsys().stats().is_balanced());
    memsys().set_allocator(&SYSTEM_HEAP);
}

#[test]
fn safe_aligned_poisons_exactly_the_payload() {
    let _guard = serial();
    memsys().set_allocator(&QUARANTINE);

    let (size, align) = (40, 128);
    let b = Block::alloc_safe_aligned(size, align).unwrap();
    // SAFETY: b is live until released.
    let data = unsafe { Block::data(b) };
    assert_eq!(data as usize % align, 0);
    assert!(payload_bytes(data, size).iter().all(|&x| x == UNINIT));

    // SAFETY: last reference.
    unsafe { Block::release(b) };
    assert!(payload_bytes(data, size).iter().all(|&x| x == FREED));

    QUARANTINE.drain();
    assert_eq!(QUARANTINE.held(), 0);
    memsys().set_allocator(&SYSTEM_HEAP);
}

#[test]
fn plain_alloc_is_not_poisoned() {
    let _guard = serial();
    memsys().set_allocator(&QUARANTINE);

    let b = Block::alloc(16).unwrap();
    // SAFETY: b is live; writing its payload is allowed.
    let data = unsafe {
        let data = Block::data(b);
        std::ptr::write_bytes(data.cast::<u8>(), 0x11, 16);
        Block::release(b);
        data
    };
    assert!(payload_bytes(data, 16).iter().all(|&x| x == 0x11));

    QUARANTINE.drain();
    memsys().set_allocator(&SYSTEM_HEAP);
}
