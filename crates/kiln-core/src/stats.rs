//! Leak-detection statistics.

use std::fmt;

/// Point-in-time copy of the runtime's allocation counters.
///
/// The byte counters track raw allocations made through the allocation
/// wrappers (handle storage included). The handle counters track
/// reference-counted blocks. The two populations overlap but are counted
/// independently and must not be conflated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemStats {
    /// Raw allocations performed.
    pub alloc: usize,
    /// Raw frees performed.
    pub free: usize,
    /// Handles initialised.
    pub handle_alloc: usize,
    /// Handles destroyed.
    pub handle_free: usize,
}

impl MemStats {
    /// Raw allocations not yet freed.
    pub fn outstanding_bytes(&self) -> usize {
        self.alloc.wrapping_sub(self.free)
    }

    /// Handles not yet destroyed.
    pub fn outstanding_handles(&self) -> usize {
        self.handle_alloc.wrapping_sub(self.handle_free)
    }

    /// Whether every allocation has a matching free at both granularities.
    pub fn is_balanced(&self) -> bool {
        self.alloc == self.free && self.handle_alloc == self.handle_free
    }

    /// Counter growth between `earlier` and `self`.
    ///
    /// Useful for leak checks scoped to one test while other activity
    /// shares the process-wide counters.
    pub fn since(&self, earlier: &MemStats) -> MemStats {
        MemStats {
            alloc: self.alloc.wrapping_sub(earlier.alloc),
            free: self.free.wrapping_sub(earlier.free),
            handle_alloc: self.handle_alloc.wrapping_sub(earlier.handle_alloc),
            handle_free: self.handle_free.wrapping_sub(earlier.handle_free),
        }
    }
}

impl fmt::Display for MemStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alloc={} free={} handle_alloc={} handle_free={}",
            self.alloc, self.free, self.handle_alloc, self.handle_free
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_balanced() {
        assert!(MemStats::default().is_balanced());
    }

    #[test]
    fn outstanding_counts() {
        let s = MemStats {
            alloc: 5,
            free: 3,
            handle_alloc: 2,
            handle_free: 2,
        };
        assert_eq!(s.outstanding_bytes(), 2);
        assert_eq!(s.outstanding_handles(), 0);
        assert!(!s.is_balanced());
    }

    #[test]
    fn since_subtracts_fieldwise() {
        let before = MemStats {
            alloc: 10,
            free: 9,
            handle_alloc: 4,
            handle_free: 4,
        };
        let after = MemStats {
            alloc: 13,
            free: 12,
            handle_alloc: 6,
            handle_free: 6,
        };
        let delta = after.since(&before);
        assert_eq!(delta.alloc, 3);
        assert_eq!(delta.free, 3);
        assert!(delta.is_balanced());
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn balanced_iff_no_outstanding(
                alloc in 0usize..1000,
                free in 0usize..1000,
                handle_alloc in 0usize..1000,
                handle_free in 0usize..1000,
            ) {
                let s = MemStats { alloc, free, handle_alloc, handle_free };
                let none_outstanding =
                    s.outstanding_bytes() == 0 && s.outstanding_handles() == 0;
                prop_assert_eq!(s.is_balanced(), none_outstanding);
            }
        }
    }
}
