//! Kiln: a reference-counted memory runtime for JIT-compiled code.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Kiln sub-crates. Rust hosts usually only need this crate; C hosts
//! link the `kiln-ffi` cdylib and include its generated `kiln.h`.
//!
//! # Quick start
//!
//! ```rust
//! use kiln::prelude::*;
//!
//! memsys().init();
//! memsys().set_atomic_inc_dec(&HOST_ATOMICS);
//!
//! let block = BlockRef::alloc(64).unwrap();
//! let shared = block.clone();
//! assert_eq!(block.refcount(), 2);
//! assert_eq!(shared.size(), 64);
//!
//! drop(shared);
//! drop(block);
//! assert!(memsys().stats().is_balanced());
//!
//! memsys().shutdown();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `kiln-core` | `AllocError`, `ContractViolation`, `MemStats`, poison bytes |
//! | [`runtime`] | `kiln-runtime` | `MemSys`, `Block`, `BlockRef`, allocators, atomics |
//! | [`ffi`] | `kiln-ffi` | C entry points and the generated-code function table |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Error types, statistics and poison bytes (`kiln-core`).
pub use kiln_core as types;

/// The runtime itself (`kiln-runtime`).
///
/// Raw handles are manipulated through associated functions on
/// [`runtime::Block`]; [`runtime::BlockRef`] is the owning wrapper.
pub use kiln_runtime as runtime;

/// C ABI (`kiln-ffi`).
///
/// Exposed so Rust hosts can hand [`ffi::kiln_get_api`] to generated code
/// without linking the cdylib separately.
pub use kiln_ffi as ffi;

/// Common imports for typical Kiln usage.
///
/// ```rust
/// use kiln::prelude::*;
/// ```
pub mod prelude {
    // Errors and statistics
    pub use kiln_core::{AllocError, ContractViolation, MemStats};

    // Runtime configuration
    pub use kiln_runtime::{
        memsys, Allocator, AtomicCas, AtomicIncDec, MemSys, HOST_ATOMICS, STUB_ATOMICS,
        SYSTEM_HEAP,
    };

    // Handles
    pub use kiln_runtime::{
        manage_memory, Block, BlockKind, BlockPtr, BlockRef, DtorFn, ExternalAllocator,
        INVALID_REFCOUNT,
    };
}
