use std::sync::atomic::{AtomicU64, Ordering};

/// Optional per-queue atomic counters.
///
/// None of these are load-bearing for correctness; every increment uses
/// `Ordering::Relaxed`. This is the crate's answer to observability on a
/// lock-free hot path: rather than pull in a logging/tracing crate, expose
/// a handful of atomic counters the caller can snapshot whenever it wants.
/// Tracking is opt-in per queue via `track_metrics` at construction, so a
/// queue that doesn't want the (tiny) extra store pays nothing.
#[derive(Debug, Default)]
pub struct Metrics {
    enabled: bool,
    enqueues: AtomicU64,
    dequeues: AtomicU64,
    catchups: AtomicU64,
    threshold_exhausted: AtomicU64,
    stale_cycle_retries: AtomicU64,
}

impl Metrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    #[inline]
    pub fn record_enqueue(&self) {
        if self.enabled {
            self.enqueues.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_dequeue(&self) {
        if self.enabled {
            self.dequeues.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_catchup(&self) {
        if self.enabled {
            self.catchups.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_threshold_exhausted(&self) {
        if self.enabled {
            self.threshold_exhausted.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_stale_cycle_retry(&self) {
        if self.enabled {
            self.stale_cycle_retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueues: self.enqueues.load(Ordering::Relaxed),
            dequeues: self.dequeues.load(Ordering::Relaxed),
            catchups: self.catchups.load(Ordering::Relaxed),
            threshold_exhausted: self.threshold_exhausted.load(Ordering::Relaxed),
            stale_cycle_retries: self.stale_cycle_retries.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`Metrics`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueues: u64,
    pub dequeues: u64,
    pub catchups: u64,
    pub threshold_exhausted: u64,
    pub stale_cycle_retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_stay_zero() {
        let m = Metrics::new(false);
        m.record_enqueue();
        m.record_dequeue();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn enabled_metrics_count() {
        let m = Metrics::new(true);
        m.record_enqueue();
        m.record_enqueue();
        m.record_dequeue();
        m.record_catchup();
        let snap = m.snapshot();
        assert_eq!(snap.enqueues, 2);
        assert_eq!(snap.dequeues, 1);
        assert_eq!(snap.catchups, 1);
    }
}
