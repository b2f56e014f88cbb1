//! Storage policies: glue multiplexing producers onto the ring queues.
//!
//! Every policy exposes the same contract ([`SampleStorage`]); they differ
//! in how producers are partitioned (global, per-thread, per-processor) and
//! in how a snapshot is assembled from the partitions.

mod mpmc_shared;
mod mpsc_processor_local;
mod spmc_processor_local;
mod thread_local;
mod unbounded;

pub use mpmc_shared::MpmcRingQueueStorage;
pub use mpsc_processor_local::MpscRingQueueProcessorLocalStorage;
pub use spmc_processor_local::SpmcRingQueueProcessorLocalStorage;
pub use thread_local::RingQueueThreadLocalStorage;
pub use unbounded::UnboundedStorage;

use crate::clock::Clock;
use crate::sample::{SampleSite, TaggedSample};
use crate::snapshot::{SamplesSnapshot, SnapshotSample};
use crate::thread::{ThreadId, ThreadNameSet};

/// Common contract of all storage policies.
///
/// `add_sample` is non-blocking from the application's point of view: a
/// policy may retry internally on producer contention with bounded backoff,
/// but never takes a lock across user code and never waits unboundedly.
///
/// `reset` must not run concurrently with producers or consumers.
pub trait SampleStorage<S: Copy + Send + 'static> {
    /// Records one sample for the calling thread.
    fn add_sample(&self, site: &'static SampleSite, time: S);

    /// Clears all queues. Not concurrent with any other operation.
    fn reset(&self);

    /// Drains everything recorded so far into a time-ordered snapshot with
    /// resolved thread names.
    fn take_all_samples<C: Clock<Sample = S>>(&self, clock: &C) -> SamplesSnapshot;

    /// Captures the calling thread's OS-level name for the next snapshot.
    ///
    /// A thread's name is only reliably readable by the thread itself; a
    /// thread that wants its name in snapshots taken after it exits must
    /// call this before exiting.
    fn remember_current_thread_name_for_next_snapshot(&self);
}

/// Converts a drained tagged record into a snapshot sample.
pub(crate) fn snapshot_sample_from_tagged<S: Copy, C: Clock<Sample = S>>(
    sample: TaggedSample<S>,
    clock: &C,
) -> SnapshotSample {
    SnapshotSample {
        site: sample.site,
        thread_id: sample.thread_id,
        time_point: clock.make_time_point(sample.time),
    }
}

/// Resolves a name for every distinct thread id appearing in `samples`,
/// merged over `names` (previously remembered names win only if the live
/// lookup fails).
pub(crate) fn resolve_thread_names(
    samples: &[SnapshotSample],
    mut names: ThreadNameSet,
) -> ThreadNameSet {
    let mut seen: Vec<ThreadId> = Vec::new();
    for sample in samples {
        let id = sample.thread_id;
        if !seen.contains(&id) {
            seen.push(id);
            names.fetch_and_remember_thread_name_for_id(id);
        }
    }
    names
}
