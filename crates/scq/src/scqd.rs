//! SCQd: the decoupled bounded pointer queue. Composes two `ScqIndex`
//! instances — an allocated-index queue `aq` and a free-index queue `fq` —
//! around a plain slot array, trading SCQ2's double-word CAS for two plain
//! 64-bit index queues plus ordinary pointer storage.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;

use crate::error::QueueError;
use crate::invariants::{debug_assert_bounded_count, debug_assert_threshold_bounded};
use crate::metrics::MetricsSnapshot;
use crate::scq_index::ScqIndex;

/// Bounded lock-free MPMC queue of `*mut T` pointers, built from two
/// `ScqIndex` queues instead of one double-word-CAS pointer queue.
pub struct Scqd<T, const FINALIZE: bool = false> {
    /// Allocated indices: currently-enqueued elements, FIFO order.
    aq: ScqIndex<FINALIZE>,
    /// Free indices: slots available to the next `try_enqueue`.
    fq: ScqIndex<FINALIZE>,
    /// Plain slot storage. Safety: a given slot is written by exactly one
    /// enqueuer after popping its index from `fq`, then made visible to
    /// exactly one dequeuer via `aq`'s own acquire/release pair before that
    /// dequeuer reads it — the same happens-before argument the original
    /// algorithm relies on for its plain (non-atomic) pointer array.
    slots: UnsafeCell<Box<[MaybeUninit<*mut T>]>>,
}

unsafe impl<T: Send, const FINALIZE: bool> Send for Scqd<T, FINALIZE> {}
unsafe impl<T: Send, const FINALIZE: bool> Sync for Scqd<T, FINALIZE> {}

impl<T, const FINALIZE: bool> Scqd<T, FINALIZE> {
    /// Builds an empty queue of the given order (`CAPACITY = 1 << order`):
    /// every index starts in the free queue, none allocated.
    pub fn new(order: u32) -> Self {
        Self::new_with_metrics(order, false)
    }

    pub fn new_with_metrics(order: u32, track_metrics: bool) -> Self {
        let capacity = 1usize << order;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, MaybeUninit::uninit);

        Self {
            aq: ScqIndex::with_counts(order, 0, 0, track_metrics).expect("aq empty init is valid"),
            fq: ScqIndex::with_counts(order, 0, capacity, track_metrics)
                .expect("fq filled init is valid"),
            slots: UnsafeCell::new(slots.into_boxed_slice()),
        }
    }

    /// Builds a queue pre-seeded with a single element, mirroring
    /// [`crate::Scq2::with_initial`]. `first` must not be null.
    ///
    /// To avoid handing the same index to both `aq` and `fq` at once, the
    /// pre-enqueued element is assigned the top index (`capacity - 1`) and
    /// `fq` is seeded with the remaining `capacity - 1` indices
    /// (`0..capacity - 1`) — which physical slot backs the first element is
    /// an implementation detail, not something a caller can observe.
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
        let capacity = 1usize << order;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, MaybeUninit::uninit);
        slots[capacity - 1] = MaybeUninit::new(first);

        Ok(Self {
            aq: ScqIndex::with_counts(order, capacity - 1, capacity, track_metrics)?,
            fq: ScqIndex::with_counts(order, 0, capacity - 1, track_metrics)?,
            slots: UnsafeCell::new(slots.into_boxed_slice()),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.aq.capacity()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.aq.metrics_snapshot()
    }

    /// Resets the internal threshold counter used for amortized empty
    /// detection. Delegates to the allocated-index queue, matching the
    /// original algorithm's `reset_threshold`.
    pub fn reset_threshold(&self, order: Ordering) {
        self.aq.reset_threshold(order);
        debug_assert_threshold_bounded!(self.aq.threshold_raw(Ordering::Acquire), -1);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.aq.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aq.is_empty()
    }

    fn write_slot(&self, idx: usize, elem: *mut T) {
        // SAFETY: `idx` was just popped from `fq`, so no other enqueuer holds
        // it; no dequeuer can observe it until it is pushed into `aq` below.
        unsafe {
            let slots = &mut *self.slots.get();
            slots[idx] = MaybeUninit::new(elem);
        }
    }

    fn read_slot(&self, idx: usize) -> *mut T {
        // SAFETY: `idx` was just popped from `aq`, which only yields indices
        // previously written by `write_slot` and pushed with a release op
        // this acquire-synchronizes with.
        unsafe {
            let slots = &*self.slots.get();
            slots[idx].assume_init()
        }
    }
}

impl<T> Scqd<T, false> {
    /// Attempts to enqueue `elem`. `elem` must not be null.
    pub fn try_enqueue(&self, elem: *mut T) -> Result<bool, QueueError> {
        self.try_enqueue_raw(elem, false)
    }

    /// Same as [`Self::try_enqueue`], but skips `fq`'s advisory empty check —
    /// same parameters as `Scq2`, per spec.md §6.
    pub fn try_enqueue_ignore_empty(&self, elem: *mut T) -> Result<bool, QueueError> {
        self.try_enqueue_raw(elem, true)
    }

    fn try_enqueue_raw(&self, elem: *mut T, ignore_empty: bool) -> Result<bool, QueueError> {
        if elem.is_null() {
            return Err(QueueError::NullPointer);
        }

        let Some(idx) = (if ignore_empty {
            self.fq.try_dequeue_ignore_empty()
        } else {
            self.fq.try_dequeue()
        }) else {
            return Ok(false);
        };

        self.write_slot(idx, elem);
        let enqueued = self.aq.try_enqueue(idx)?;
        debug_assert!(enqueued, "aq has spare capacity for every index fq yields");
        debug_assert_bounded_count!(self.aq.len(), self.capacity());
        debug_assert_bounded_count!(self.fq.len(), self.capacity());
        Ok(true)
    }

    /// Attempts to dequeue a pointer from the queue's head.
    pub fn try_dequeue(&self) -> Option<*mut T> {
        self.try_dequeue_raw(false)
    }

    /// Same as [`Self::try_dequeue`], but skips `aq`'s advisory empty check.
    pub fn try_dequeue_ignore_empty(&self) -> Option<*mut T> {
        self.try_dequeue_raw(true)
    }

    fn try_dequeue_raw(&self, ignore_empty: bool) -> Option<*mut T> {
        let idx = if ignore_empty {
            self.aq.try_dequeue_ignore_empty()
        } else {
            self.aq.try_dequeue()
        }?;
        let elem = self.read_slot(idx);
        let _ = self.fq.try_enqueue(idx);
        debug_assert_bounded_count!(self.aq.len(), self.capacity());
        debug_assert_bounded_count!(self.fq.len(), self.capacity());
        Some(elem)
    }
}

impl<T> Scqd<T, true> {
    /// Attempts to enqueue `elem`. `elem` must not be null. Finalizing the
    /// queue (see [`Self::finalize_queue`]) fails future calls; a call that
    /// loses the race with finalization rolls its index back into `fq`.
    pub fn try_enqueue(&self, elem: *mut T) -> Result<bool, QueueError> {
        self.try_enqueue_raw(elem, false)
    }

    /// Same as [`Self::try_enqueue`], but skips `fq`'s advisory empty check —
    /// same parameters as `Scq2`, per spec.md §6.
    pub fn try_enqueue_ignore_empty(&self, elem: *mut T) -> Result<bool, QueueError> {
        self.try_enqueue_raw(elem, true)
    }

    fn try_enqueue_raw(&self, elem: *mut T, ignore_empty: bool) -> Result<bool, QueueError> {
        if elem.is_null() {
            return Err(QueueError::NullPointer);
        }

        let Some(idx) = (if ignore_empty {
            self.fq.try_dequeue_ignore_empty()
        } else {
            self.fq.try_dequeue()
        }) else {
            self.aq.finalize_queue();
            return Ok(false);
        };

        self.write_slot(idx, elem);
        match self.aq.try_enqueue(idx)? {
            true => {
                debug_assert_bounded_count!(self.aq.len(), self.capacity());
                debug_assert_bounded_count!(self.fq.len(), self.capacity());
                Ok(true)
            }
            false => {
                let _ = self.fq.try_enqueue(idx);
                Ok(false)
            }
        }
    }

    pub fn try_dequeue(&self) -> Option<*mut T> {
        self.try_dequeue_raw(false)
    }

    /// Same as [`Self::try_dequeue`], but skips `aq`'s advisory empty check.
    pub fn try_dequeue_ignore_empty(&self) -> Option<*mut T> {
        self.try_dequeue_raw(true)
    }

    fn try_dequeue_raw(&self, ignore_empty: bool) -> Option<*mut T> {
        let idx = if ignore_empty {
            self.aq.try_dequeue_ignore_empty()
        } else {
            self.aq.try_dequeue()
        }?;
        let elem = self.read_slot(idx);
        let _ = self.fq.try_enqueue(idx);
        debug_assert_bounded_count!(self.aq.len(), self.capacity());
        debug_assert_bounded_count!(self.fq.len(), self.capacity());
        Some(elem)
    }

    pub fn finalize_queue(&self) {
        self.aq.finalize_queue();
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.aq.is_finalized()
    }
}
