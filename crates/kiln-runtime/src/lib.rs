//! Reference-counted memory runtime for JIT-compiled code.
//!
//! Generated code receives a uniform handle ([`Block`]) to a heap block:
//! a reference count, an optional destructor, the payload pointer and its
//! size, and an optional external allocator. Everything the runtime
//! allocates flows through one funnel ([`raw`]) so the process-wide
//! leak-detection counters stay exact.
//!
//! # Architecture
//!
//! ```text
//! MemSys (process singleton: heap, atomics, shutdown flag, counters)
//! ├── raw        allocate / allocate_external / reallocate / free
//! ├── layout     combined header+payload blocks, aligned variant
//! ├── block      Block header: init, alloc*, acquire, release, accessors
//! │   ├── dtor       plain / safe / managed / boxed-closure adapters
//! │   └── varsize    resizable buffers (payload allocated separately)
//! └── BlockRef   safe owning wrapper (Clone = acquire, Drop = release)
//! ```
//!
//! The runtime never implements real atomics. Refcount updates go through
//! the [`AtomicIncDec`] binding installed on [`MemSys`]; the default is a
//! non-atomic stand-in that is only correct single-threaded. Hosts must
//! install real primitives (for Rust hosts, [`HostAtomics`]) before handles
//! cross threads.
//!
//! # Failure model
//!
//! Allocation failure is the only recoverable error ([`AllocError`]).
//! Contract violations print a diagnostic and abort (see [`fatal`]).
//!
//! # Cargo features
//!
//! - `refcount-check` (default): abort on acquire/release at refcount 0.
//! - `debug-trace`: trace every operation through the `log` facade.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

#[macro_use]
mod debug;

pub mod atomics;
pub mod block;
pub mod block_ref;
pub mod dtor;
pub mod external;
pub mod fatal;
pub mod heap;
pub mod layout;
pub mod memsys;
pub mod raw;
pub mod varsize;

#[cfg(test)]
pub(crate) mod test_support;

pub use atomics::{
    AtomicCas, AtomicIncDec, ExternAtomics, ExternCas, HostAtomics, StubAtomics, HOST_ATOMICS,
    STUB_ATOMICS,
};
pub use block::{Block, BlockKind, BlockPtr, DtorFn, INVALID_REFCOUNT};
pub use block_ref::BlockRef;
pub use dtor::{manage_memory, ManagedDtorFn};
pub use external::{sample_external_allocator, ExternalAllocator};
pub use heap::{Allocator, HeapFns, SystemHeap, SYSTEM_HEAP};
pub use kiln_core::{AllocError, ContractViolation, MemStats};
pub use memsys::{memsys, MemSys};
pub use varsize::ElementDtorFn;
