//! Benchmark profiles for the Kiln memory runtime.
//!
//! - [`Profile`]: the runtime configuration a benchmark runs under
//! - [`PAYLOAD_SIZES`]: payload sizes swept by the allocation benches
//! - [`churn`]: allocate-share-release workload used by several benches

#![deny(rustdoc::broken_intra_doc_links)]

use kiln_core::AllocError;
use kiln_runtime::{memsys, BlockRef, HOST_ATOMICS};

/// Payload sizes swept by the allocation benches: a scalar, a cache line,
/// a small array and a page.
pub const PAYLOAD_SIZES: [usize; 4] = [8, 64, 512, 4096];

/// Runtime configuration for a benchmark run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    /// Non-atomic stand-in primitives, as a freshly initialised runtime.
    Stub,
    /// Host atomics from `std::sync::atomic`.
    Host,
}

impl Profile {
    /// Re-initialise the runtime under this profile.
    pub fn install(self) {
        memsys().init();
        if self == Profile::Host {
            memsys().set_atomic_inc_dec(&HOST_ATOMICS);
            memsys().set_atomic_cas(&HOST_ATOMICS);
        }
    }

    /// Label used in benchmark ids.
    pub fn name(self) -> &'static str {
        match self {
            Profile::Stub => "stub",
            Profile::Host => "host",
        }
    }
}

/// Allocate `count` handles of `size` bytes, give each `shares` extra
/// references, then drop everything. Returns the total payload bytes
/// touched.
pub fn churn(count: usize, size: usize, shares: usize) -> Result<usize, AllocError> {
    let mut live = Vec::with_capacity(count * (shares + 1));
    for _ in 0..count {
        let b = BlockRef::alloc(size)?;
        for _ in 0..shares {
            live.push(b.clone());
        }
        live.push(b);
    }
    let bytes = live.iter().map(BlockRef::size).sum::<usize>();
    drop(live);
    Ok(bytes)
}
