//! Bounded, lock-free, multi-producer multi-consumer FIFO queues from the
//! SCQ family (Nikolaev, 2019).
//!
//! Three variants are provided:
//!
//! - [`ScqIndex`](scq_index::ScqIndex) — the core algorithm, moving small
//!   integer indices in `[0, CAPACITY)`.
//! - [`Scq2`](scq2::Scq2) — a pointer queue built on a 128-bit double-word
//!   atomic slot.
//! - [`Scqd`](scqd::Scqd) — a decoupled pointer queue composing two
//!   `ScqIndex` instances (an allocated-index queue and a free-index queue)
//!   around a plain slot array.
//!
//! All three are bounded at construction (`CAPACITY = 1 << order`) and
//! never resize. None of them own their payload storage beyond the raw
//! slot array each needs internally — `ScqIndex` moves indices the caller
//! maps to its own storage, `Scq2`/`Scqd` move raw pointers the caller owns.

mod backoff;
mod cache_aligned;
mod cycle;
mod error;
mod invariants;
mod metrics;
mod scq_index;
mod scq2;
mod scqd;

pub use backoff::Backoff;
pub use error::QueueError;
pub use metrics::{Metrics, MetricsSnapshot};
pub use scq2::Scq2;
pub use scq_index::{QueueInit, ScqIndex};
pub use scqd::Scqd;
