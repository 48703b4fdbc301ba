//! Core types for the Kiln memory runtime.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! vocabulary shared by the runtime, the C ABI layer and the test
//! fixtures: error categories, leak-detection statistics and the poison
//! byte patterns used by the debug allocation variants.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod poison;
pub mod stats;

pub use error::{AllocError, ContractViolation};
pub use stats::MemStats;
