//! Error types for the Kiln memory runtime.
//!
//! Two tiers. [`AllocError`] is the only recoverable failure: the
//! underlying allocator could not satisfy a request. [`ContractViolation`]
//! describes a broken API invariant; the runtime never returns it to a
//! caller, it prints it and aborts the process.

use std::error::Error;
use std::fmt;

/// Recoverable allocation failures.
///
/// Every allocating entry point returns this instead of a handle. At the
/// C boundary it becomes a null pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The underlying allocator returned null.
    OutOfMemory {
        /// Total bytes requested from the allocator, header included.
        requested: usize,
    },
    /// The request plus the runtime's bookkeeping overhead does not fit in
    /// `usize`.
    SizeOverflow {
        /// Payload bytes requested by the caller.
        requested: usize,
        /// Header and alignment padding added by the runtime.
        overhead: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "allocator returned null for {requested} bytes")
            }
            Self::SizeOverflow {
                requested,
                overhead,
            } => {
                write!(
                    f,
                    "allocation size overflow: {requested} bytes plus {overhead} bytes of overhead"
                )
            }
        }
    }
}

impl Error for AllocError {}

/// Violations of the runtime's API contract.
///
/// These are fatal: continuing would operate on provably inconsistent
/// global or per-handle state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractViolation {
    /// The default allocator was swapped while blocks were still allocated.
    AllocatorSwapWithOutstanding {
        /// Byte-level allocations minus frees at the time of the swap.
        outstanding_bytes: usize,
        /// Handle-level allocations minus frees at the time of the swap.
        outstanding_handles: usize,
    },
    /// A resizable-buffer operation was invoked on a fixed-size handle.
    NotResizable {
        /// Name of the offending operation.
        operation: &'static str,
    },
    /// A handle was acquired or released with a reference count of zero.
    RefcountUnderflow {
        /// Name of the offending operation.
        operation: &'static str,
    },
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocatorSwapWithOutstanding {
                outstanding_bytes,
                outstanding_handles,
            } => {
                write!(
                    f,
                    "cannot change allocator while blocks are allocated \
                     ({outstanding_bytes} raw, {outstanding_handles} handles outstanding)"
                )
            }
            Self::NotResizable { operation } => {
                write!(f, "{operation} called with a non-resizable handle")
            }
            Self::RefcountUnderflow { operation } => {
                write!(f, "{operation} called on a handle with refcount 0")
            }
        }
    }
}

impl Error for ContractViolation {}
