use thiserror::Error;

/// Precondition violations reported by queue constructors and by the
/// pointer-taking entry points of [`crate::scq2::Scq2`] and [`crate::scqd::Scqd`].
///
/// Operational failure to enqueue/dequeue (queue full, queue empty) is not an
/// error: it is reported as `false` from `try_enqueue`/`try_dequeue`, per the
/// algorithm's own distinction between "this call cannot proceed right now"
/// and "this call was asked to do something nonsensical".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// An index argument fell outside `[0, capacity)`.
    #[error("index {idx} out of range for capacity {capacity}")]
    IndexOutOfRange { idx: usize, capacity: usize },

    /// A pointer argument to `try_enqueue` was null.
    #[error("pointer must not be null")]
    NullPointer,

    /// `with_counts` was given a `(deq_count, enq_count)` pair that cannot
    /// describe any valid queue state.
    #[error(
        "malformed initial counts: deq_count {deq_count} > enq_count {enq_count}, \
         or enq_count > capacity {capacity}"
    )]
    MalformedInit {
        deq_count: usize,
        enq_count: usize,
        capacity: usize,
    },
}
