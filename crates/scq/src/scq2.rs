//! SCQ2: the bounded lock-free MPMC pointer queue. Where `ScqIndex` moves
//! small integer indices, `Scq2` moves raw pointers directly, using a
//! double-word `(tag, pointer)` atomic slot instead of a single 64-bit word.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use portable_atomic::AtomicU128;

use crate::backoff::Backoff;
use crate::cache_aligned::CacheAligned;
use crate::cycle::Cycle;
use crate::error::QueueError;
use crate::invariants::{
    debug_assert_bounded_count, debug_assert_finalize_monotonic, debug_assert_threshold_bounded,
};
use crate::metrics::{Metrics, MetricsSnapshot};

const ENQUEUE_BIT: u64 = 0b01;
const DEQUEUE_BIT: u64 = 0b10;
const FINALIZE_BIT: u64 = 1u64 << 63;

#[inline]
fn pack(tag: u64, ptr: u64) -> u128 {
    (u128::from(tag) << 64) | u128::from(ptr)
}

#[inline]
fn unpack(slot: u128) -> (u64, u64) {
    ((slot >> 64) as u64, slot as u64)
}

/// Bounded lock-free MPMC queue of `*mut T` pointers.
///
/// Unlike [`crate::scq_index::ScqIndex`], each slot here is a double-word
/// `(tag, pointer)` pair, CASed atomically as one 128-bit word via
/// `portable_atomic::AtomicU128` — the idiomatic stand-in for the original
/// algorithm's inline `cmpxchg16b`.
pub struct Scq2<T, const FINALIZE: bool = false> {
    order: u32,
    n: u64,
    threshold_init: i64,
    head: CacheAligned<AtomicU64>,
    tail: CacheAligned<AtomicU64>,
    threshold: CacheAligned<AtomicI64>,
    slots: Box<[AtomicU128]>,
    metrics: Metrics,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send, const FINALIZE: bool> Send for Scq2<T, FINALIZE> {}
unsafe impl<T: Send, const FINALIZE: bool> Sync for Scq2<T, FINALIZE> {}

impl<T, const FINALIZE: bool> Scq2<T, FINALIZE> {
    /// Builds an empty queue of the given order (`CAPACITY = 1 << order`).
    pub fn new(order: u32) -> Self {
        Self::new_with_metrics(order, false)
    }

    pub fn new_with_metrics(order: u32, track_metrics: bool) -> Self {
        assert!(order >= 2, "order must be at least 2");
        let n = 1u64 << order;
        let mut slots = Vec::with_capacity(n as usize);
        slots.resize_with(n as usize, || AtomicU128::new(0));

        Self {
            order,
            n,
            threshold_init: 2 * n as i64 - 1,
            head: CacheAligned(AtomicU64::new(n)),
            tail: CacheAligned(AtomicU64::new(n)),
            threshold: CacheAligned(AtomicI64::new(-1)),
            slots: slots.into_boxed_slice(),
            metrics: Metrics::new(track_metrics),
            _marker: PhantomData,
        }
    }

    /// Builds a queue pre-seeded with one element, matching the original
    /// algorithm's single-argument constructor.
    pub fn with_initial(order: u32, first: *mut T) -> Result<Self, QueueError> {
        Self::with_initial_and_metrics(order, first, false)
    }

    pub fn with_initial_and_metrics(
        order: u32,
        first: *mut T,
        track_metrics: bool,
    ) -> Result<Self, QueueError> {
        if first.is_null() {
            return Err(QueueError::NullPointer);
        }
        let mut queue = Self::new_with_metrics(order, track_metrics);
        let idx = queue.cache_remap(queue.n);
        queue.tail = CacheAligned(AtomicU64::new(queue.n + 1));
        queue.slots[idx] = AtomicU128::new(pack(queue.n | ENQUEUE_BIT, first as u64));
        queue.reset_threshold(Ordering::Relaxed);
        Ok(queue)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.n as usize
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[inline]
    fn cache_remap(&self, idx: u64) -> usize {
        let shift = self.order.saturating_sub(3);
        (((idx % self.n) >> shift) | ((idx << 3) % self.n)) as usize
    }

    fn reset_threshold(&self, order: Ordering) {
        self.threshold.store(self.threshold_init, order);
    }

    /// Attempts to enqueue `elem` at the queue's tail. `elem` must not be null.
    pub fn try_enqueue(&self, elem: *mut T) -> Result<bool, QueueError> {
        self.try_enqueue_raw(elem, false, false)
    }

    pub fn try_enqueue_ignore_empty(&self, elem: *mut T) -> Result<bool, QueueError> {
        self.try_enqueue_raw(elem, true, false)
    }

    fn try_enqueue_raw(
        &self,
        elem: *mut T,
        ignore_empty: bool,
        ignore_full: bool,
    ) -> Result<bool, QueueError> {
        if elem.is_null() {
            return Err(QueueError::NullPointer);
        }

        if !ignore_full {
            let tail = self.tail.load(Ordering::Acquire);
            if tail >= self.n + self.head.load(Ordering::Acquire) {
                return Ok(false);
            }
        }

        loop {
            let tail = self.tail.fetch_add(1, Ordering::AcqRel);
            if FINALIZE && (tail & FINALIZE_BIT) == FINALIZE_BIT {
                return Ok(false);
            }

            let tail_cycle = Cycle(tail & !(self.n - 1));
            let slot = &self.slots[self.cache_remap(tail)];
            let mut packed = slot.load(Ordering::Relaxed);

            loop {
                let (tag, _ptr) = unpack(packed);
                let cycle = Cycle(tag & !(self.n - 1));
                let admits = cycle < tail_cycle
                    && (tag == cycle.0
                        || (tag == (cycle.0 | DEQUEUE_BIT)
                            && self.head.load(Ordering::Acquire) <= tail));

                if admits {
                    let desired = pack(tail_cycle.0 | ENQUEUE_BIT, elem as u64);
                    match slot.compare_exchange_weak(
                        packed,
                        desired,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            if !ignore_empty
                                && self.threshold.load(Ordering::Relaxed) != self.threshold_init
                            {
                                self.reset_threshold(Ordering::Release);
                            }
                            self.metrics.record_enqueue();
                            debug_assert_bounded_count!(self.len(), self.capacity());
                            return Ok(true);
                        }
                        Err(observed) => {
                            packed = observed;
                            continue;
                        }
                    }
                }

                self.reset_threshold(Ordering::SeqCst);

                if !ignore_full && tail + 1 >= self.n + self.head.load(Ordering::Relaxed) {
                    if FINALIZE {
                        self.tail.fetch_or(FINALIZE_BIT, Ordering::Release);
                    }
                    return Ok(false);
                }

                break;
            }
        }
    }

    /// Attempts to dequeue a pointer from the queue's head.
    pub fn try_dequeue(&self) -> Option<*mut T> {
        self.try_dequeue_raw(false)
    }

    pub fn try_dequeue_ignore_empty(&self) -> Option<*mut T> {
        self.try_dequeue_raw(true)
    }

    fn try_dequeue_raw(&self, ignore_empty: bool) -> Option<*mut T> {
        if !ignore_empty && self.threshold.load(Ordering::Acquire) < 0 {
            return None;
        }

        let mut backoff = Backoff::new();

        loop {
            let head = self.head.fetch_add(1, Ordering::AcqRel);
            let head_cycle = Cycle(head & !(self.n - 1));
            let slot = &self.slots[self.cache_remap(head)];
            let mut packed = slot.load(Ordering::Acquire);

            let mut dequeued: Option<u64> = None;

            'body: loop {
                let (tag, ptr) = unpack(packed);
                let enq_cycle = Cycle(tag & !(self.n - 1));
                if enq_cycle.0 == head_cycle.0 {
                    let mask = pack(!ENQUEUE_BIT, 0);
                    let prev = slot.fetch_and(mask, Ordering::AcqRel);
                    let (_, prev_ptr) = unpack(prev);
                    dequeued = Some(prev_ptr);
                    break 'body;
                }

                let tag_new;
                if (tag & !DEQUEUE_BIT) != enq_cycle.0 {
                    tag_new = tag | DEQUEUE_BIT;
                    if tag == tag_new {
                        break 'body;
                    }
                } else {
                    tag_new = head_cycle.0 | (tag & DEQUEUE_BIT);
                }

                if enq_cycle < head_cycle {
                    let desired = pack(tag_new, ptr);
                    match slot.compare_exchange_weak(
                        packed,
                        desired,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break 'body,
                        Err(observed) => {
                            packed = observed;
                            backoff.spin();
                            continue 'body;
                        }
                    }
                }
                break 'body;
            }

            if let Some(ptr) = dequeued {
                self.metrics.record_dequeue();
                debug_assert_bounded_count!(self.len(), self.capacity());
                return Some(ptr as *mut T);
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

    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire) & !FINALIZE_BIT;
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head).min(self.n) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Scq2<T, true> {
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
    fn single_thread_fifo_order() {
        let q: Scq2<u64, false> = Scq2::new(3);
        let mut storage: Vec<u64> = (0..8).collect();
        for v in &mut storage {
            assert_eq!(q.try_enqueue(v as *mut u64).unwrap(), true);
        }
        for expected in &storage {
            let got = q.try_dequeue().unwrap();
            assert_eq!(unsafe { *got }, *expected);
        }
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn null_pointer_is_an_error() {
        let q: Scq2<u64, false> = Scq2::new(3);
        assert_eq!(q.try_enqueue(std::ptr::null_mut()), Err(QueueError::NullPointer));
    }

    #[test]
    fn with_initial_seeds_one_element() {
        let mut value = 42u64;
        let q: Scq2<u64, false> = Scq2::with_initial(3, &mut value as *mut u64).unwrap();
        assert_eq!(q.len(), 1);
        let got = q.try_dequeue().unwrap();
        assert_eq!(unsafe { *got }, 42);
    }

    #[test]
    fn finalize_stops_further_enqueues() {
        let q: Scq2<u64, true> = Scq2::new(3);
        let mut a = 1u64;
        let mut b = 2u64;
        assert!(q.try_enqueue(&mut a as *mut u64).unwrap());
        q.finalize_queue();
        assert!(q.is_finalized());
        assert_eq!(q.try_enqueue(&mut b as *mut u64).unwrap(), false);
        let got = q.try_dequeue().unwrap();
        assert_eq!(unsafe { *got }, 1);
    }
}
