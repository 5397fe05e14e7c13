//! Exhaustive small-capacity interleaving tests via `loom`.
//!
//! Run with `cargo test --features loom --test loom_tests --release`.
//! Loom explores every relevant thread interleaving for a simplified model
//! at a tiny capacity, rather than relying on luck to hit a race in a
//! normal multi-threaded run.

#![cfg(feature = "loom")]

use loom::sync::Arc;
use loom::thread;
use scq::ScqIndex;

// INV-SCQ-03 (element conservation): two producers racing to enqueue
// distinct indices into a capacity-4 queue concurrently with two consumers
// racing to drain it — producers and consumers overlap in time, so loom
// explores the actual enqueue/dequeue interleavings this algorithm has to
// get right, not just producer-vs-producer or consumer-vs-consumer races.
#[test]
fn element_conservation_under_concurrent_enqueue_dequeue() {
    loom::model(|| {
        let q = Arc::new(ScqIndex::<false>::empty(2)); // capacity 4, small enough for loom

        let producers: Vec<_> = (0..2usize)
            .map(|i| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    q.try_enqueue(i).unwrap();
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2usize)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.try_dequeue())
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }

        // A consumer can legitimately race ahead of both enqueues and see the
        // queue as empty, so we can't assert both consumers always get an
        // element — only that no element is ever observed more than once.
        let mut seen = Vec::new();
        for c in consumers {
            if let Some(idx) = c.join().unwrap() {
                seen.push(idx);
            }
        }

        let mut deduped = seen.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(seen.len(), deduped.len(), "an index was observed more than once");
        assert!(seen.iter().all(|idx| *idx < 2), "dequeued an index that was never enqueued");
    });
}

// INV-SCQ-05 (finalization monotonicity): once a concurrent finalize
// observes the finalize bit set, no subsequent enqueue can succeed, and the
// bit is never observed to clear afterwards.
#[test]
fn finalize_is_monotonic_under_race() {
    loom::model(|| {
        let q = Arc::new(ScqIndex::<true>::empty(2));

        let enqueuer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.try_enqueue(0).unwrap())
        };
        let finalizer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.finalize_queue())
        };

        enqueuer.join().unwrap();
        finalizer.join().unwrap();

        assert!(q.is_finalized());
        // Finalize is one-shot: asserting again must still observe it set.
        assert!(q.is_finalized());
        assert_eq!(q.try_enqueue(1).unwrap(), false);
    });
}
