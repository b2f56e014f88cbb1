use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::processor::{ProcessorIdLookup, SchedGetCpuLookup};
use crate::ring::SpscRingQueue;
use crate::sample::{SampleSite, TaggedSample};
use crate::sink::TransformSink;
use crate::snapshot::{merge_sorted_suffix, SamplesSnapshot, SnapshotSample};
use crate::storage::{resolve_thread_names, SampleStorage};
use crate::thread::{current_thread_id, ThreadId, ThreadNameSet};
use std::sync::{Mutex, PoisonError, TryLockError};

/// Per-processor storage with a try-locked SPSC queue per processor.
///
/// A producer asks the lookup which processor it is running on and
/// try-locks that processor's slot. A failed try-lock means another thread
/// is mid-push on the same processor — which implies the caller has likely
/// been migrated, so the lookup is re-queried after a bounded-backoff yield
/// rather than spinning on a stale slot.
pub struct SpmcRingQueueProcessorLocalStorage<S, const CAP: usize, L = SchedGetCpuLookup> {
    slots: Vec<ProcessorSlot<S, CAP>>,
    lookup: L,
    remembered_thread_names: Mutex<ThreadNameSet>,
}

struct ProcessorSlot<S, const CAP: usize> {
    samples: Mutex<SpscRingQueue<TaggedSample<S>, CAP>>,
}

impl<S: Copy + Send + 'static, const CAP: usize> SpmcRingQueueProcessorLocalStorage<S, CAP> {
    pub fn new() -> Self {
        Self::with_lookup(SchedGetCpuLookup::new())
    }
}

impl<S: Copy + Send + 'static, const CAP: usize> Default
    for SpmcRingQueueProcessorLocalStorage<S, CAP>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Copy + Send + 'static, const CAP: usize, L: ProcessorIdLookup>
    SpmcRingQueueProcessorLocalStorage<S, CAP, L>
{
    pub fn with_lookup(lookup: L) -> Self {
        let slot_count = lookup.max_processor_id() + 1;
        Self {
            slots: (0..slot_count)
                .map(|_| ProcessorSlot {
                    samples: Mutex::new(SpscRingQueue::new()),
                })
                .collect(),
            lookup,
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
            // Re-query every attempt: a failed try-lock usually means this
            // thread was preempted and moved to another processor.
            let processor_id = self.lookup.current_processor_id();
            debug_assert!(processor_id < self.slots.len());
            match self.slots[processor_id].samples.try_lock() {
                Ok(queue) => {
                    queue.push(1, |handle| handle.set(0, sample));
                    return;
                }
                Err(TryLockError::Poisoned(poisoned)) => {
                    let queue = poisoned.into_inner();
                    queue.push(1, |handle| handle.set(0, sample));
                    return;
                }
                Err(TryLockError::WouldBlock) => {
                    backoff.snooze();
                }
            }
        }
    }
}

impl<S: Copy + Send + 'static, const CAP: usize, L: ProcessorIdLookup> SampleStorage<S>
    for SpmcRingQueueProcessorLocalStorage<S, CAP, L>
{
    fn add_sample(&self, site: &'static SampleSite, time: S) {
        self.add_sample_with_thread_id(site, time, current_thread_id());
    }

    fn reset(&self) {
        for slot in &self.slots {
            let queue = slot.samples.lock().unwrap_or_else(PoisonError::into_inner);
            queue.reset();
        }
    }

    fn take_all_samples<C: Clock<Sample = S>>(&self, clock: &C) -> SamplesSnapshot {
        let mut samples: Vec<SnapshotSample> = Vec::new();
        for slot in &self.slots {
            let size_before = samples.len();
            {
                let queue = slot.samples.lock().unwrap_or_else(PoisonError::into_inner);
                let mut sink = TransformSink::new(&mut samples, |sample: TaggedSample<S>| {
                    SnapshotSample {
                        site: sample.site,
                        thread_id: sample.thread_id,
                        time_point: clock.make_time_point(sample.time),
                    }
                });
                queue.pop_all_into(&mut sink);
            }
            // Each processor's segment is in clock order; merge it into the
            // accumulated, already-sorted samples. Cross-processor order is
            // the clock's order, nothing stronger.
            merge_sorted_suffix(&mut samples, size_before);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::processor::ProcessorId;
    use crate::sample::SampleKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SITE: SampleSite = SampleSite::new("cat", "work", SampleKind::Enter);

    /// Lookup that cycles processors on every query, exercising the
    /// re-query path.
    struct RotatingLookup {
        next: AtomicUsize,
        max_id: ProcessorId,
    }

    impl ProcessorIdLookup for RotatingLookup {
        fn max_processor_id(&self) -> ProcessorId {
            self.max_id
        }

        fn current_processor_id(&self) -> ProcessorId {
            self.next.fetch_add(1, Ordering::Relaxed) % (self.max_id + 1)
        }
    }

    #[test]
    fn snapshot_merges_processor_segments_by_time() {
        let clock = FakeClock::new();
        let storage = SpmcRingQueueProcessorLocalStorage::<u64, 64, _>::with_lookup(
            RotatingLookup {
                next: AtomicUsize::new(0),
                max_id: 3,
            },
        );
        for _ in 0..10 {
            storage.add_sample(&SITE, clock.query());
        }

        let snapshot = storage.take_all_samples(&clock);
        assert_eq!(snapshot.len(), 10);
        let times: Vec<u64> = snapshot
            .iter()
            .map(|sample| sample.time_point().nanoseconds_since_reference())
            .collect();
        assert_eq!(times, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn default_lookup_round_trips() {
        let clock = FakeClock::new();
        let storage = SpmcRingQueueProcessorLocalStorage::<u64, 16>::new();
        storage.add_sample(&SITE, clock.query());
        let snapshot = storage.take_all_samples(&clock);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.at(0).thread_id(), current_thread_id());
    }

    #[test]
    fn reset_then_snapshot_is_empty() {
        let clock = FakeClock::new();
        let storage = SpmcRingQueueProcessorLocalStorage::<u64, 16>::new();
        storage.add_sample(&SITE, clock.query());
        storage.reset();
        assert!(storage.take_all_samples(&clock).is_empty());
    }
}
