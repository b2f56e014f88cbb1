use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::mpmc_ring::MpmcRingQueue;
use crate::mpsc_ring::PushResult;
use crate::sample::{SampleSite, TaggedSample};
use crate::sink::TransformSink;
use crate::snapshot::SamplesSnapshot;
use crate::storage::{resolve_thread_names, snapshot_sample_from_tagged, SampleStorage};
use crate::thread::{current_thread_id, ThreadId, ThreadNameSet};
use std::sync::{Mutex, PoisonError};

/// Bounded shared storage: all threads push into one MPMC ring queue.
///
/// Lossy under sustained producer pressure, like every ring-backed policy.
/// Producer contention surfaces as `NotPushedDueToContention` from the
/// queue and is retried here with bounded backoff.
pub struct MpmcRingQueueStorage<S, const CAP: usize> {
    queue: MpmcRingQueue<TaggedSample<S>, CAP>,
    remembered_thread_names: Mutex<ThreadNameSet>,
}

impl<S: Copy + Send + 'static, const CAP: usize> MpmcRingQueueStorage<S, CAP> {
    pub fn new() -> Self {
        Self {
            queue: MpmcRingQueue::new(),
            remembered_thread_names: Mutex::new(ThreadNameSet::new()),
        }
    }

    /// `add_sample` with an explicit thread id, for callers that already
    /// know it.
    pub fn add_sample_with_thread_id(&self, site: &'static SampleSite, time: S, thread_id: ThreadId) {
        let sample = TaggedSample {
            site,
            thread_id,
            time,
        };
        let mut backoff = Backoff::new();
        while self.queue.try_push(1, |handle| handle.set(0, sample))
            == PushResult::NotPushedDueToContention
        {
            backoff.snooze();
        }
    }
}

impl<S: Copy + Send + 'static, const CAP: usize> Default for MpmcRingQueueStorage<S, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Copy + Send + 'static, const CAP: usize> SampleStorage<S> for MpmcRingQueueStorage<S, CAP> {
    fn add_sample(&self, site: &'static SampleSite, time: S) {
        self.add_sample_with_thread_id(site, time, current_thread_id());
    }

    fn reset(&self) {
        self.queue.reset();
    }

    fn take_all_samples<C: Clock<Sample = S>>(&self, clock: &C) -> SamplesSnapshot {
        let mut samples = Vec::new();
        {
            let mut sink = TransformSink::new(&mut samples, |sample: TaggedSample<S>| {
                snapshot_sample_from_tagged(sample, clock)
            });
            self.queue.pop_all_into(&mut sink);
        }
        // One global queue, reservations serialize producers: committed
        // order is already time order.
        let remembered = std::mem::take(
            &mut *self
                .remembered_thread_names
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let thread_names = resolve_thread_names(&samples, remembered);
        SamplesSnapshot::new(samples, thread_names)
    }

    fn remember_current_thread_name_for_next_snapshot(&self) {
        self.remembered_thread_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remember_name_of_current_thread(current_thread_id());
    }
}
