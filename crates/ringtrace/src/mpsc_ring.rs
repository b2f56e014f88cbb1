use crate::invariants::debug_assert_reservation_bounded;
use crate::ring::{abort_due_to_overflow, PushHandle, RingState};
use crate::sink::QueueSink;
use std::sync::atomic::{fence, Ordering};

/// Outcome of a multi-producer reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum PushResult {
    /// The batch was reserved, written, and committed.
    Pushed,
    /// Another producer held an outstanding reservation; nothing was written.
    /// The caller owns the retry policy.
    NotPushedDueToContention,
}

/// A special-purpose, lossy, bounded, MPSC FIFO queue optimized for
/// uncontended writes.
///
/// Same storage layout and drain protocol as [`SpscRingQueue`]; the
/// reservation is a compare-exchange of `write_end_vindex` against the
/// observed `write_begin_vindex`, so at any instant at most one producer
/// holds an open reservation and the committed prefix stays contiguous.
///
/// MPSC: any number of threads may push; one thread drains.
///
/// [`SpscRingQueue`]: crate::SpscRingQueue
pub struct MpscRingQueue<T, const CAP: usize> {
    state: RingState<T, CAP>,
}

impl<T: Copy, const CAP: usize> MpscRingQueue<T, CAP> {
    pub fn new() -> Self {
        Self {
            state: RingState::new(),
        }
    }

    /// Returns the fixed capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Resets the queue. Must not run concurrently with any other operation.
    pub fn reset(&self) {
        self.state.reset();
    }

    /// Attempts to reserve `count` cells and run `writer` to fill them.
    ///
    /// Fails with [`PushResult::NotPushedDueToContention`] when another
    /// producer won the reservation race; no retry is performed internally.
    /// Aborts the process if the virtual index would overflow.
    pub fn try_push<F>(&self, count: usize, writer: F) -> PushResult
    where
        F: FnOnce(&mut PushHandle<'_, T, CAP>),
    {
        debug_assert_reservation_bounded!(count, CAP);
        let begin = self.state.write_begin_vindex().load(Ordering::SeqCst);
        let end = match begin.checked_add(count as u64) {
            Some(end) => end,
            None => abort_due_to_overflow(),
        };
        if self
            .state
            .write_end_vindex()
            .compare_exchange(begin, end, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return PushResult::NotPushedDueToContention;
        }

        // Looks redundant next to the seq-cst CAS, but the drain protocol's
        // overwrite detection needs this fence to pair with its own. Keep it.
        fence(Ordering::SeqCst);

        let mut handle = PushHandle::new(&self.state, begin, count);
        writer(&mut handle);

        self.state.write_begin_vindex().store(end, Ordering::Release);
        PushResult::Pushed
    }

    /// Drains the committed region into `sink`. Consumer-only; never blocks.
    pub fn pop_all_into<S: QueueSink<T>>(&self, sink: &mut S) {
        self.state.pop_all_into(sink);
    }
}

impl<T: Copy, const CAP: usize> Default for MpscRingQueue<T, CAP> {
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

    fn drain<T: Copy, const CAP: usize>(queue: &MpscRingQueue<T, CAP>) -> Vec<T> {
        let mut out = Vec::new();
        queue.pop_all_into(&mut VecSink::new(&mut out));
        out
    }

    #[test]
    fn uncontended_push_succeeds() {
        let queue = MpscRingQueue::<u32, 4>::new();
        assert_eq!(
            queue.try_push(1, |handle| handle.set(0, 7)),
            PushResult::Pushed
        );
        assert_eq!(drain(&queue), vec![7]);
    }

    #[test]
    fn overwrite_drops_oldest() {
        let queue = MpscRingQueue::<u32, 4>::new();
        for value in 1..=5 {
            assert_eq!(
                queue.try_push(1, |handle| handle.set(0, value)),
                PushResult::Pushed
            );
        }
        assert_eq!(drain(&queue), vec![2, 3, 4, 5]);
    }

    #[test]
    fn contended_producers_all_eventually_push() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: u64 = 1000;

        let queue = Arc::new(MpscRingQueue::<(usize, u64), 8192>::new());
        let mut handles = Vec::new();
        for producer in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for value in 0..PER_PRODUCER {
                    let mut backoff = Backoff::new();
                    while queue.try_push(1, |handle| handle.set(0, (producer, value)))
                        == PushResult::NotPushedDueToContention
                    {
                        backoff.snooze();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let drained = drain(&queue);
        assert_eq!(drained.len(), PRODUCERS * PER_PRODUCER as usize);

        // Per-producer FIFO: each producer's items appear in push order.
        let mut next_expected = [0u64; PRODUCERS];
        for (producer, value) in drained {
            assert_eq!(value, next_expected[producer]);
            next_expected[producer] += 1;
        }
    }
}
