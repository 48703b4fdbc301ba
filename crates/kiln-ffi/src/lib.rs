//! C ABI for the Kiln memory runtime.
//!
//! Hosts call [`kiln_memsys_init`](memsys::kiln_memsys_init) once at start,
//! optionally install an allocator and atomic primitives, and call
//! [`kiln_memsys_shutdown`](memsys::kiln_memsys_shutdown) once at exit.
//! Generated code reaches the runtime through the function table returned
//! by [`kiln_get_api`](api::kiln_get_api) or through the individual
//! `kiln_block_*` entry points.
//!
//! Allocation failure is reported as a null pointer. Contract violations
//! and Rust panics abort the process after printing a diagnostic. The C
//! header is generated into `include/kiln.h` by the build script.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

/// Run an FFI body, aborting the process if it panics.
///
/// Unwinding into C is undefined behaviour, and the runtime's entry points
/// return pointers with no room for a status code, so a caught panic is
/// reported on stderr and turned into an abort.
macro_rules! ffi_guard {
    ($body:block) => {
        match ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $body)) {
            Ok(value) => value,
            Err(payload) => $crate::abort_on_panic(payload),
        }
    };
}

pub mod api;
pub mod block;
pub mod memsys;
pub mod raw;
mod registry;
pub mod types;

pub use api::{kiln_get_api, KilnApiFunctions};

use std::any::Any;
use std::io::Write;

#[cold]
pub(crate) fn abort_on_panic(payload: Box<dyn Any + Send>) -> ! {
    let msg = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload");
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "kiln: panic at FFI boundary: {msg}");
    let _ = err.flush();
    std::process::abort()
}
