use crate::mpsc_ring::{MpscRingQueue, PushResult};
use crate::ring::PushHandle;
use crate::sink::QueueSink;
use std::sync::Mutex;

/// A special-purpose, lossy, bounded, MPMC FIFO queue.
///
/// Producers behave exactly like [`MpscRingQueue`] producers and stay
/// unserialized, both against each other and against consumers. Consumers
/// additionally serialize on an internal mutex, so any number of threads may
/// drain.
pub struct MpmcRingQueue<T, const CAP: usize> {
    queue: MpscRingQueue<T, CAP>,
    consumer_mutex: Mutex<()>,
}

impl<T: Copy, const CAP: usize> MpmcRingQueue<T, CAP> {
    pub fn new() -> Self {
        Self {
            queue: MpscRingQueue::new(),
            consumer_mutex: Mutex::new(()),
        }
    }

    /// Returns the fixed capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Resets the queue. Must not run concurrently with any other operation.
    pub fn reset(&self) {
        self.queue.reset();
    }

    /// Attempts to reserve `count` cells and run `writer` to fill them.
    ///
    /// See [`MpscRingQueue::try_push`].
    pub fn try_push<F>(&self, count: usize, writer: F) -> PushResult
    where
        F: FnOnce(&mut PushHandle<'_, T, CAP>),
    {
        self.queue.try_push(count, writer)
    }

    /// Drains the committed region into `sink`.
    ///
    /// Callable from any number of threads; drains are serialized internally.
    pub fn pop_all_into<S: QueueSink<T>>(&self, sink: &mut S) {
        let _guard = self
            .consumer_mutex
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.queue.pop_all_into(sink);
    }
}

impl<T: Copy, const CAP: usize> Default for MpmcRingQueue<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::VecSink;
    use crate::Backoff;
    use std::sync::Arc;

    #[test]
    fn overwrite_drops_oldest() {
        let queue = MpmcRingQueue::<u32, 4>::new();
        for value in 1..=5 {
            assert_eq!(
                queue.try_push(1, |handle| handle.set(0, value)),
                PushResult::Pushed
            );
        }
        let mut out = Vec::new();
        queue.pop_all_into(&mut VecSink::new(&mut out));
        assert_eq!(out, vec![2, 3, 4, 5]);
    }

    #[test]
    fn concurrent_consumers_split_the_stream() {
        const PRODUCERS: usize = 2;
        const CONSUMERS: usize = 2;
        const PER_PRODUCER: u64 = 2000;

        let queue = Arc::new(MpmcRingQueue::<u64, 8192>::new());
        let mut producers = Vec::new();
        for producer in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            producers.push(std::thread::spawn(move || {
                for value in 0..PER_PRODUCER {
                    let encoded = (producer as u64) << 32 | value;
                    let mut backoff = Backoff::new();
                    while queue.try_push(1, |handle| handle.set(0, encoded))
                        == PushResult::NotPushedDueToContention
                    {
                        backoff.snooze();
                    }
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..CONSUMERS {
            let queue = Arc::clone(&queue);
            consumers.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..10_000 {
                    queue.pop_all_into(&mut VecSink::new(&mut seen));
                }
                seen
            }));
        }

        for producer in producers {
            producer.join().unwrap();
        }
        let mut all: Vec<u64> = Vec::new();
        for consumer in consumers {
            all.extend(consumer.join().unwrap());
        }
        // Final sweep for anything still queued.
        queue.pop_all_into(&mut VecSink::new(&mut all));

        // Each item is seen at most once, and per-producer order within a
        // single consumer's stream is preserved by the serialized drain.
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "an item was drained twice");
        assert!(all.len() <= PRODUCERS * PER_PRODUCER as usize);
    }
}
