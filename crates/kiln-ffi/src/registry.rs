//! Interning of host-supplied bindings.
//!
//! `MemSys` identifies allocators and primitives by address. A C host
//! hands over bare function pointers, so each distinct set is leaked once
//! into a `'static` binding and reused afterwards: installing the same
//! `malloc`/`realloc`/`free` triple twice yields the same allocator and
//! passes the outstanding-allocation check.

use std::hash::Hash;
use std::sync::{LazyLock, Mutex, PoisonError};

use indexmap::IndexMap;
use kiln_runtime::{ExternAtomics, ExternCas, HeapFns};

type Registry<T> = LazyLock<Mutex<IndexMap<T, &'static T>>>;

static HEAPS: Registry<HeapFns> = LazyLock::new(Default::default);
static INC_DEC: Registry<ExternAtomics> = LazyLock::new(Default::default);
static CAS: Registry<ExternCas> = LazyLock::new(Default::default);

fn intern<T>(registry: &Registry<T>, value: T) -> &'static T
where
    T: Copy + Eq + Hash + Send + Sync + 'static,
{
    let mut map = registry.lock().unwrap_or_else(PoisonError::into_inner);
    *map.entry(value)
        .or_insert_with(|| &*Box::leak(Box::new(value)))
}

pub(crate) fn heap(fns: HeapFns) -> &'static HeapFns {
    intern(&HEAPS, fns)
}

pub(crate) fn inc_dec(ops: ExternAtomics) -> &'static ExternAtomics {
    intern(&INC_DEC, ops)
}

pub(crate) fn cas(ops: ExternCas) -> &'static ExternCas {
    intern(&CAS, ops)
}

#[cfg(test)]
pub(crate) fn heap_count() -> usize {
    HEAPS.lock().unwrap_or_else(PoisonError::into_inner).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_triple_interns_to_same_binding() {
        let a = heap(HeapFns::libc());
        let b = heap(HeapFns::libc());
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn distinct_triples_get_distinct_bindings() {
        #[allow(unsafe_code)]
        unsafe extern "C" fn never(_size: usize) -> *mut std::ffi::c_void {
            std::ptr::null_mut()
        }
        let libc = heap(HeapFns::libc());
        let other = heap(HeapFns {
            malloc: never,
            ..HeapFns::libc()
        });
        assert!(!std::ptr::eq(libc, other));
        assert!(heap_count() >= 2);
    }
}
