//! Global sequence numbers and the entity ids derived from them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of consecutive sequence numbers that map onto the same entity (kiosk) id.
pub const ENTITY_CHUNK_SIZE: u64 = 100_000;

/// Derive the synthetic entity id for a sequence number.
///
/// Sequence numbers are partitioned into fixed chunks of [`ENTITY_CHUNK_SIZE`], so the result is
/// non-decreasing in `seq`.
pub fn derive_entity_id(seq: u64) -> u64 {
    seq / ENTITY_CHUNK_SIZE
}

/// Issues strictly increasing sequence numbers for the lifetime of a run.
///
/// A number handed out by [`allocate`][Self::allocate] is never issued again, whether or not the
/// event built from it reaches the transport. Allocation is atomic so the allocator can be
/// shared, but only the emission loop is expected to call it.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    last: AtomicU64,
}

impl SequenceAllocator {
    /// Create an allocator whose first issued number is `1`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator that resumes after `last`.
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Issue the next sequence number.
    pub fn allocate(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently issued number, or the starting point if none has been issued yet.
    pub fn last_allocated(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;

    #[test]
    fn entity_id_chunks() {
        assert_eq!(derive_entity_id(0), 0);
        assert_eq!(derive_entity_id(1), 0);
        assert_eq!(derive_entity_id(99_999), 0);
        assert_eq!(derive_entity_id(100_000), 1);
        assert_eq!(derive_entity_id(100_001), 1);
        assert_eq!(derive_entity_id(1_000_000), 10);
        assert_eq!(derive_entity_id(1_499_999), 14);
    }

    #[test]
    fn entity_id_is_non_decreasing() {
        let mut previous = 0;
        for seq in (0..2_000_000).step_by(7_919) {
            let id = derive_entity_id(seq);
            assert!(id >= previous, "entity id went backwards at {seq}");
            assert_eq!(id, seq / 100_000);
            previous = id;
        }
    }

    #[test]
    fn allocation_is_monotonic() {
        let alloc = SequenceAllocator::new();
        assert_eq!(alloc.last_allocated(), 0);
        assert_eq!(alloc.allocate(), 1);
        assert_eq!(alloc.allocate(), 2);
        assert_eq!(alloc.allocate(), 3);
        assert_eq!(alloc.last_allocated(), 3);

        let resumed = SequenceAllocator::starting_after(41);
        assert_eq!(resumed.allocate(), 42);
    }

    #[test]
    fn concurrent_allocation_never_reuses() {
        let alloc = Arc::new(SequenceAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || (0..10_000).map(|_| alloc.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for seq in h.join().unwrap() {
                assert!(seen.insert(seq), "sequence {seq} issued twice");
            }
        }
        assert_eq!(seen.len(), 40_000);
        assert_eq!(alloc.last_allocated(), 40_000);
    }
}
