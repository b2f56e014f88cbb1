use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::mpsc_ring::{MpscRingQueue, PushResult};
use crate::processor::{ProcessorIdLookup, SchedGetCpuLookup};
use crate::sample::{SampleSite, TaggedSample};
use crate::sink::TransformSink;
use crate::snapshot::{merge_sorted_suffix, SamplesSnapshot, SnapshotSample};
use crate::storage::{resolve_thread_names, SampleStorage};
use crate::thread::{current_thread_id, ThreadId, ThreadNameSet};
use std::sync::{Mutex, PoisonError};

/// Per-processor storage with a mutex-free producer path: one MPSC ring
/// queue per processor.
///
/// A producer that loses the reservation race (because a thread that was
/// preempted mid-push on this processor still holds a reservation, or
/// because the caller itself was migrated) gets
/// `NotPushedDueToContention`; the retry re-queries the processor lookup
/// after a bounded-backoff yield. Snapshots serialize on a pop mutex.
pub struct MpscRingQueueProcessorLocalStorage<S, const CAP: usize, L = SchedGetCpuLookup> {
    slots: Vec<MpscRingQueue<TaggedSample<S>, CAP>>,
    lookup: L,
    pop_samples_mutex: Mutex<()>,
    remembered_thread_names: Mutex<ThreadNameSet>,
}

impl<S: Copy + Send + 'static, const CAP: usize> MpscRingQueueProcessorLocalStorage<S, CAP> {
    pub fn new() -> Self {
        Self::with_lookup(SchedGetCpuLookup::new())
    }
}

impl<S: Copy + Send + 'static, const CAP: usize> Default
    for MpscRingQueueProcessorLocalStorage<S, CAP>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Copy + Send + 'static, const CAP: usize, L: ProcessorIdLookup>
    MpscRingQueueProcessorLocalStorage<S, CAP, L>
{
    pub fn with_lookup(lookup: L) -> Self {
        let slot_count = lookup.max_processor_id() + 1;
        Self {
            slots: (0..slot_count).map(|_| MpscRingQueue::new()).collect(),
            lookup,
            pop_samples_mutex: Mutex::new(()),
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
        loop {
            let processor_id = self.lookup.current_processor_id();
            debug_assert!(processor_id < self.slots.len());
            match self.slots[processor_id].try_push(1, |handle| handle.set(0, sample)) {
                PushResult::Pushed => return,
                PushResult::NotPushedDueToContention => backoff.snooze(),
            }
        }
    }
}

impl<S: Copy + Send + 'static, const CAP: usize, L: ProcessorIdLookup> SampleStorage<S>
    for MpscRingQueueProcessorLocalStorage<S, CAP, L>
{
    fn add_sample(&self, site: &'static SampleSite, time: S) {
        self.add_sample_with_thread_id(site, time, current_thread_id());
    }

    fn reset(&self) {
        for slot in &self.slots {
            slot.reset();
        }
    }

    fn take_all_samples<C: Clock<Sample = S>>(&self, clock: &C) -> SamplesSnapshot {
        let mut samples: Vec<SnapshotSample> = Vec::new();
        {
            let _guard = self
                .pop_samples_mutex
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for slot in &self.slots {
                let size_before = samples.len();
                let mut sink = TransformSink::new(&mut samples, |sample: TaggedSample<S>| {
                    SnapshotSample {
                        site: sample.site,
                        thread_id: sample.thread_id,
                        time_point: clock.make_time_point(sample.time),
                    }
                });
                slot.pop_all_into(&mut sink);
                drop(sink);
                merge_sorted_suffix(&mut samples, size_before);
            }
        }

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
