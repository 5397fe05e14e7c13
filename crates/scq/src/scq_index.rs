//! SCQ-index: the core bounded lock-free MPMC queue of small integer indices
//! in `[0, CAPACITY)`. This is the queue `Scqd` composes twice; `Scq2` adapts
//! the same ticket/slot protocol to a pointer-sized payload instead.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::backoff::Backoff;
use crate::cache_aligned::CacheAligned;
use crate::cycle::Cycle;
use crate::error::QueueError;
use crate::invariants::{
    debug_assert_bounded_count, debug_assert_cycle_monotonic, debug_assert_finalize_monotonic,
    debug_assert_index_in_range, debug_assert_threshold_bounded,
};
use crate::metrics::{Metrics, MetricsSnapshot};

const EMPTY_SLOT: u64 = u64::MAX;
const FINALIZE_BIT: u64 = 1u64 << 63;

/// Bounded lock-free MPMC queue of indices in `[0, CAPACITY)`.
///
/// `CAPACITY` is `1 << order`, fixed at construction and never resized.
/// `FINALIZE` is a compile-time switch: when `true`, [`ScqIndex::finalize_queue`]
/// exists and `try_enqueue` honors the one-shot finalize bit; when `false`,
/// the queue can never be closed and that check is compiled out entirely.
pub struct ScqIndex<const FINALIZE: bool = false> {
    order: u32,
    capacity: u64,
    /// `N = 2 * capacity`, the slot array length.
    n: u64,
    threshold_init: i64,
    head: CacheAligned<AtomicU64>,
    tail: CacheAligned<AtomicU64>,
    threshold: CacheAligned<AtomicI64>,
    slots: Box<[AtomicU64]>,
    metrics: Metrics,
}

/// The `(deq_count, enq_count)` pair a queue may be constructed from,
/// describing a partially pre-filled queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInit {
    pub deq_count: usize,
    pub enq_count: usize,
}

impl QueueInit {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deq_count == 0 && self.enq_count == 0
    }
}

impl<const FINALIZE: bool> ScqIndex<FINALIZE> {
    /// Builds an empty queue of the given order (`CAPACITY = 1 << order`).
    pub fn empty(order: u32) -> Self {
        Self::with_counts(order, 0, 0, false).expect("empty init is always valid")
    }

    /// Builds a queue pre-filled with every index `0..CAPACITY`.
    pub fn filled(order: u32) -> Self {
        let capacity = 1usize << order;
        Self::with_counts(order, 0, capacity, false).expect("filled init is always valid")
    }

    /// Builds a queue with `deq_count` indices already dequeued and
    /// `enq_count` indices already enqueued (`deq_count <= enq_count <= CAPACITY`).
    pub fn with_counts(
        order: u32,
        deq_count: usize,
        enq_count: usize,
        track_metrics: bool,
    ) -> Result<Self, QueueError> {
        assert!(order >= 2, "order must be at least 2");
        let capacity = 1u64 << order;
        if deq_count as u64 > enq_count as u64 || enq_count as u64 > capacity {
            return Err(QueueError::MalformedInit {
                deq_count,
                enq_count,
                capacity: capacity as usize,
            });
        }

        let n = 2 * capacity;
        let init = QueueInit {
            deq_count,
            enq_count,
        };
        let threshold_init = 3 * n as i64 - 1;

        let mut slots = Vec::with_capacity(n as usize);
        slots.resize_with(n as usize, || AtomicU64::new(0));
        let slots = slots.into_boxed_slice();

        let queue = Self {
            order,
            capacity,
            n,
            threshold_init,
            head: CacheAligned(AtomicU64::new(deq_count as u64)),
            tail: CacheAligned(AtomicU64::new(enq_count as u64)),
            threshold: CacheAligned(AtomicI64::new(if init.is_empty() {
                -1
            } else {
                threshold_init
            })),
            slots,
            metrics: Metrics::new(track_metrics),
        };

        for i in 0..deq_count as u64 {
            queue.slots[queue.cache_remap(i)].store(2 * n - 1, Ordering::Relaxed);
        }
        for i in deq_count as u64..enq_count as u64 {
            queue.slots[queue.cache_remap(i)].store(n + i, Ordering::Relaxed);
        }
        for i in enq_count as u64..n {
            queue.slots[queue.cache_remap(i)].store(EMPTY_SLOT, Ordering::Relaxed);
        }

        Ok(queue)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Spreads consecutive indices across the slot array to avoid false
    /// sharing between producers/consumers contending on adjacent tickets.
    #[inline]
    fn cache_remap(&self, idx: u64) -> usize {
        let shift = self.order.saturating_sub(3);
        let remapped = ((idx % self.n) >> shift) | ((idx << 4) % self.n);
        debug_assert_index_in_range!(remapped, self.n);
        remapped as usize
    }

    /// Attempts to enqueue `idx` at the queue's tail.
    ///
    /// Returns `Ok(false)` if the queue is full (or finalized, for
    /// `FINALIZE = true` queues); `Err` only for the precondition violation
    /// of an out-of-range index.
    pub fn try_enqueue(&self, idx: usize) -> Result<bool, QueueError> {
        self.try_enqueue_raw(idx, false)
    }

    /// As [`Self::try_enqueue`], but skips the threshold reset that lets
    /// `try_dequeue` detect emptiness. Only use this when the queue is
    /// known never to become empty.
    pub fn try_enqueue_ignore_empty(&self, idx: usize) -> Result<bool, QueueError> {
        self.try_enqueue_raw(idx, true)
    }

    fn try_enqueue_raw(&self, idx: usize, ignore_empty: bool) -> Result<bool, QueueError> {
        if idx as u64 >= self.capacity {
            return Err(QueueError::IndexOutOfRange {
                idx,
                capacity: self.capacity as usize,
            });
        }

        let enq_idx = idx as u64 ^ (self.n - 1);
        loop {
            let tail = self.tail.fetch_add(1, Ordering::AcqRel);
            if FINALIZE && (tail & FINALIZE_BIT) == FINALIZE_BIT {
                return Ok(false);
            }

            let tail_cycle = Cycle((tail << 1) | (2 * self.n - 1));
            let slot = &self.slots[self.cache_remap(tail)];
            let mut tag = slot.load(Ordering::Acquire);

            loop {
                let cycle = Cycle(tag | (2 * self.n - 1));
                let admits = cycle < tail_cycle
                    && (tag == cycle.0
                        || (tag == (cycle.0 ^ self.n)
                            && Cycle(self.head.load(Ordering::Acquire)) <= Cycle(tail)));

                if !admits {
                    break;
                }

                match slot.compare_exchange_weak(
                    tag,
                    tail_cycle.0 ^ enq_idx,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        debug_assert_cycle_monotonic!(cycle.0, tail_cycle.0);
                        if !ignore_empty && self.threshold.load(Ordering::Acquire) != self.threshold_init {
                            self.reset_threshold(Ordering::Release);
                        }
                        self.metrics.record_enqueue();
                        debug_assert_bounded_count!(self.len(), self.capacity());
                        return Ok(true);
                    }
                    Err(observed) => {
                        tag = observed;
                        continue;
                    }
                }
            }
        }
    }

    /// Attempts to dequeue the index at the queue's head, returning it on success.
    pub fn try_dequeue(&self) -> Option<usize> {
        self.try_dequeue_raw(false)
    }

    /// As [`Self::try_dequeue`], but skips the fast empty check. Only use
    /// this when the queue is known never to become empty.
    pub fn try_dequeue_ignore_empty(&self) -> Option<usize> {
        self.try_dequeue_raw(true)
    }

    fn try_dequeue_raw(&self, ignore_empty: bool) -> Option<usize> {
        if !ignore_empty && self.threshold.load(Ordering::Acquire) < 0 {
            return None;
        }

        let mut backoff = Backoff::new();

        loop {
            let head = self.head.fetch_add(1, Ordering::AcqRel);
            let head_cycle = Cycle((head << 1) | (2 * self.n - 1));
            let slot = &self.slots[self.cache_remap(head)];

            let mut entry = slot.load(Ordering::Acquire);
            let mut attempt: u32 = 0;
            let mut dequeued: Option<u64> = None;

            'body: loop {
                let entry_cycle = Cycle(entry | (2 * self.n - 1));
                if entry_cycle.0 == head_cycle.0 {
                    slot.fetch_or(self.n - 1, Ordering::AcqRel);
                    dequeued = Some(entry % self.n);
                    break 'body;
                }

                let entry_new;
                if (entry | self.n) != entry_cycle.0 {
                    entry_new = entry & !self.n;
                    if entry == entry_new {
                        break 'body;
                    }
                } else {
                    attempt += 1;
                    if attempt <= 10_000 {
                        self.metrics.record_stale_cycle_retry();
                        backoff.spin();
                        entry = slot.load(Ordering::Acquire);
                        continue 'body;
                    }
                    entry_new = head_cycle.0 ^ (!entry & self.n);
                }

                if entry_cycle < head_cycle {
                    match slot.compare_exchange_weak(
                        entry,
                        entry_new,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        // CAS succeeded: this slot is now marked empty for us,
                        // but it was never our ticket to begin with. Move on.
                        Ok(_) => break 'body,
                        Err(observed) => {
                            entry = observed;
                            continue 'body;
                        }
                    }
                }
                break 'body;
            }

            if let Some(raw_idx) = dequeued {
                self.metrics.record_dequeue();
                debug_assert_bounded_count!(self.len(), self.capacity());
                return Some(raw_idx as usize);
            }

            if !ignore_empty {
                let tail = self.tail.load(Ordering::Acquire);
                if Cycle(tail) <= Cycle(head.wrapping_add(1)) {
                    self.catchup(tail, head.wrapping_add(1));
                    let prev = self.threshold.fetch_sub(1, Ordering::AcqRel);
                    debug_assert_threshold_bounded!(prev - 1, -self.threshold_init);
                    self.metrics.record_threshold_exhausted();
                    return None;
                }

                let prev = self.threshold.fetch_sub(1, Ordering::AcqRel);
                debug_assert_threshold_bounded!(prev - 1, -self.threshold_init);
                if prev <= 0 {
                    self.metrics.record_threshold_exhausted();
                    return None;
                }
            }
        }
    }

    fn catchup(&self, tail_init: u64, head_init: u64) {
        self.metrics.record_catchup();
        let mut tail = tail_init;
        let mut head = head_init;
        while self
            .tail
            .compare_exchange_weak(tail, head, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            head = self.head.load(Ordering::Acquire);
            tail = self.tail.load(Ordering::Acquire);
            if Cycle(tail) >= Cycle(head) {
                break;
            }
        }
    }

    /// Resets the internal threshold counter that lets `try_dequeue` detect
    /// emptiness in amortized O(1). Called automatically by `try_enqueue`;
    /// exposed for composed queues (see `Scqd`) that need to call it directly.
    pub(crate) fn reset_threshold(&self, order: Ordering) {
        self.threshold.store(self.threshold_init, order);
    }

    /// A raw snapshot of the threshold counter, for `Scqd`'s own debug
    /// assertions (it composes two `ScqIndex` instances and has no other way
    /// to observe either one's internal threshold state).
    pub(crate) fn threshold_raw(&self, order: Ordering) -> i64 {
        self.threshold.load(order)
    }

    /// A relaxed, advisory snapshot of the number of enqueued-but-not-yet-dequeued
    /// tickets. Not part of the algorithm: a convenience accessor, like the
    /// teacher's `Ring::len`.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire) & !FINALIZE_BIT;
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head).min(self.capacity) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScqIndex<true> {
    /// Sets the one-shot finalize bit, closing the queue to further
    /// `try_enqueue` calls. Monotonic: once observed set, never cleared.
    pub fn finalize_queue(&self) {
        self.tail.fetch_or(FINALIZE_BIT, Ordering::Release);
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        let was_finalized = (self.tail.load(Ordering::Acquire) & FINALIZE_BIT) == FINALIZE_BIT;
        let is_finalized = (self.tail.load(Ordering::Acquire) & FINALIZE_BIT) == FINALIZE_BIT;
        debug_assert_finalize_monotonic!(was_finalized, is_finalized);
        is_finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_dequeue_fails() {
        let q = ScqIndex::<false>::empty(3);
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn single_thread_fifo_order() {
        let q = ScqIndex::<false>::empty(3);
        for i in 0..8 {
            assert_eq!(q.try_enqueue(i).unwrap(), true);
        }
        assert_eq!(q.try_enqueue(0).unwrap(), false);
        for i in 0..8 {
            assert_eq!(q.try_dequeue(), Some(i));
        }
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let q = ScqIndex::<false>::empty(3);
        assert_eq!(
            q.try_enqueue(8),
            Err(QueueError::IndexOutOfRange { idx: 8, capacity: 8 })
        );
    }

    #[test]
    fn filled_queue_starts_at_capacity() {
        let q = ScqIndex::<false>::filled(3);
        assert_eq!(q.len(), 8);
        for i in 0..8 {
            assert_eq!(q.try_dequeue(), Some(i));
        }
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn malformed_init_is_rejected() {
        let err = ScqIndex::<false>::with_counts(3, 5, 2, false).unwrap_err();
        assert_eq!(
            err,
            QueueError::MalformedInit {
                deq_count: 5,
                enq_count: 2,
                capacity: 8
            }
        );
    }

    #[test]
    fn finalize_stops_further_enqueues() {
        let q = ScqIndex::<true>::empty(3);
        assert!(q.try_enqueue(0).unwrap());
        q.finalize_queue();
        assert!(q.is_finalized());
        assert_eq!(q.try_enqueue(1).unwrap(), false);
        // already-enqueued elements remain dequeueable after finalize
        assert_eq!(q.try_dequeue(), Some(0));
    }

    #[test]
    fn wrap_around_reuse() {
        let q = ScqIndex::<false>::empty(2); // capacity 4
        for round in 0..100 {
            for i in 0..4 {
                assert!(q.try_enqueue(i).unwrap(), "round {round} idx {i}");
            }
            for i in 0..4 {
                assert_eq!(q.try_dequeue(), Some(i), "round {round}");
            }
        }
    }
}
