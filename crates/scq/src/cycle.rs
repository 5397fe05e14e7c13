//! Cyclic (wrap-aware) ordering over the 64-bit ticket space.
//!
//! Raw `head`/`tail` counters increase without bound (modulo `u64`
//! wraparound, which at realistic throughput takes decades to reach). Slot
//! tags embed a *cycle*, a scaled-down view of the same counter, and must be
//! compared the same wrap-aware way: by casting the difference to a signed
//! integer rather than comparing the unsigned values directly.

/// A cycle value extracted from a ticket or a slot tag. Ordered by signed
/// subtraction, so it remains correct across `u64` wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cycle(pub u64);

impl PartialOrd for Cycle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cycle {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let diff = (self.0 as i64).wrapping_sub(other.0 as i64);
        diff.cmp(&0)
    }
}
