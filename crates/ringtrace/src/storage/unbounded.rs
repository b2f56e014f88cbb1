use crate::clock::Clock;
use crate::sample::{SampleSite, TaggedSample};
use crate::snapshot::SamplesSnapshot;
use crate::storage::{resolve_thread_names, snapshot_sample_from_tagged, SampleStorage};
use crate::thread::{current_thread_id, ThreadId, ThreadNameSet};
use std::sync::{Mutex, PoisonError};

/// Simplest storage: one growable vector behind a mutex.
///
/// Never drops samples, but every `add_sample` takes the process-wide lock
/// and may allocate, so it is the baseline other policies are measured
/// against rather than something to trace a hot path with.
pub struct UnboundedStorage<S> {
    samples: Mutex<Vec<TaggedSample<S>>>,
    remembered_thread_names: Mutex<ThreadNameSet>,
}

impl<S: Copy + Send + 'static> UnboundedStorage<S> {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            remembered_thread_names: Mutex::new(ThreadNameSet::new()),
        }
    }

    /// `add_sample` with an explicit thread id, for callers that already
    /// know it.
    pub fn add_sample_with_thread_id(&self, site: &'static SampleSite, time: S, thread_id: ThreadId) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TaggedSample {
                site,
                thread_id,
                time,
            });
    }
}

impl<S: Copy + Send + 'static> Default for UnboundedStorage<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Copy + Send + 'static> SampleStorage<S> for UnboundedStorage<S> {
    fn add_sample(&self, site: &'static SampleSite, time: S) {
        self.add_sample_with_thread_id(site, time, current_thread_id());
    }

    fn reset(&self) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn take_all_samples<C: Clock<Sample = S>>(&self, clock: &C) -> SamplesSnapshot {
        let raw = std::mem::take(
            &mut *self.samples.lock().unwrap_or_else(PoisonError::into_inner),
        );
        // The global mutex serializes producers and the clock is
        // process-global and monotonic, so insertion order is already
        // time order.
        let samples: Vec<_> = raw
            .into_iter()
            .map(|sample| snapshot_sample_from_tagged(sample, clock))
            .collect();
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
