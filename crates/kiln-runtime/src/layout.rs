//! Combined header+payload allocations.
//!
//! A combined block is one allocation holding a [`Block`] header followed
//! by the payload. All the pointer arithmetic for placing and aligning the
//! payload lives here.

use std::ptr::NonNull;

use kiln_core::AllocError;

use crate::block::Block;
use crate::external::ExternalAllocator;
use crate::raw;

/// Size of the handle header at the front of every combined block.
pub const HEADER_SIZE: usize = std::mem::size_of::<Block>();

/// A freshly allocated header slot plus the payload that follows it.
///
/// The header is uninitialised storage; pass it to [`Block::init`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CombinedBlock {
    header: NonNull<Block>,
    payload: NonNull<u8>,
}

impl CombinedBlock {
    /// The header slot (start of the allocation).
    pub fn header(&self) -> NonNull<Block> {
        self.header
    }

    /// The payload start.
    pub fn payload(&self) -> NonNull<u8> {
        self.payload
    }

    /// Bytes from the header start to the payload start.
    pub fn payload_offset(&self) -> usize {
        self.payload.as_ptr() as usize - self.header.as_ptr() as usize
    }
}

/// Allocate a header plus `size` payload bytes in one request.
pub fn allocate_combined(
    size: usize,
    external: Option<&ExternalAllocator>,
) -> Result<CombinedBlock, AllocError> {
    let total = size.checked_add(HEADER_SIZE).ok_or(AllocError::SizeOverflow {
        requested: size,
        overhead: HEADER_SIZE,
    })?;
    let base = raw::allocate_external(total, external)?;
    // SAFETY: the allocation is HEADER_SIZE + size bytes long.
    let payload = unsafe { base.add(HEADER_SIZE) };
    Ok(CombinedBlock {
        header: base.cast(),
        payload,
    })
}

/// Bytes to add to `addr` to reach a multiple of `align`.
///
/// `align` need not be a power of two; zero is treated as one.
pub fn align_offset(addr: usize, align: usize) -> usize {
    let align = align.max(1);
    let rem = if align.is_power_of_two() {
        addr & (align - 1)
    } else {
        addr % align
    };
    if rem == 0 {
        0
    } else {
        align - rem
    }
}

/// Allocate a header plus `size` payload bytes whose payload start is a
/// multiple of `align`.
///
/// Over-allocates `size + 2 * align` payload bytes and shifts the payload
/// forward, so the padding never runs past the allocation.
pub fn allocate_combined_aligned(
    size: usize,
    align: usize,
    external: Option<&ExternalAllocator>,
) -> Result<CombinedBlock, AllocError> {
    let align = align.max(1);
    let padded = align
        .checked_mul(2)
        .and_then(|pad| size.checked_add(pad))
        .ok_or(AllocError::SizeOverflow {
            requested: size,
            overhead: HEADER_SIZE.saturating_add(align.saturating_mul(2)),
        })?;
    let block = allocate_combined(padded, external)?;
    let shift = align_offset(block.payload.as_ptr() as usize, align);
    // SAFETY: shift < align <= 2 * align, so payload + shift + size stays
    // inside the padded payload.
    let payload = unsafe { block.payload.add(shift) };
    Ok(CombinedBlock {
        header: block.header,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memsys::memsys;
    use crate::test_support::serial;

    #[test]
    fn align_offset_basics() {
        assert_eq!(align_offset(0, 8), 0);
        assert_eq!(align_offset(1, 8), 7);
        assert_eq!(align_offset(8, 8), 0);
        assert_eq!(align_offset(13, 1), 0);
        assert_eq!(align_offset(13, 0), 0);
        assert_eq!(align_offset(10, 3), 2);
        assert_eq!(align_offset(12, 3), 0);
    }

    #[test]
    fn combined_payload_follows_header() {
        let _guard = serial();
        let block = allocate_combined(10, None).unwrap();
        assert_eq!(block.payload_offset(), HEADER_SIZE);
        // SAFETY: the header is the allocation start.
        unsafe { raw::free(block.header().as_ptr().cast()) };
        assert!(memsys().stats().is_balanced());
    }

    #[test]
    fn size_overflow_is_reported() {
        let _guard = serial();
        let err = allocate_combined(usize::MAX, None).unwrap_err();
        assert_eq!(
            err,
            AllocError::SizeOverflow {
                requested: usize::MAX,
                overhead: HEADER_SIZE,
            }
        );
        assert_eq!(memsys().stats_alloc(), 0);
    }

    #[test]
    fn aligned_payload_is_aligned() {
        let _guard = serial();
        for align in [1, 2, 16, 64, 48, 4096] {
            let block = allocate_combined_aligned(100, align, None).unwrap();
            assert_eq!(block.payload().as_ptr() as usize % align, 0);
            assert!(block.payload_offset() >= HEADER_SIZE);
            assert!(block.payload_offset() < HEADER_SIZE + align);
            // SAFETY: the header is the allocation start.
            unsafe { raw::free(block.header().as_ptr().cast()) };
        }
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn align_offset_reaches_a_multiple(addr in 0usize..1 << 40, align in 1usize..=4096) {
                let off = align_offset(addr, align);
                prop_assert!(off < align);
                prop_assert_eq!((addr + off) % align, 0);
            }
        }
    }
}
