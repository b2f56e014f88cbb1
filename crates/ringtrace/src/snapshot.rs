use crate::clock::TimePoint;
use crate::sample::{SampleKind, SampleSite};
use crate::thread::{ThreadId, ThreadNameSet};

/// One sample after its raw clock reading has been converted.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotSample {
    pub site: &'static SampleSite,
    pub thread_id: ThreadId,
    pub time_point: TimePoint,
}

/// Immutable result of draining a storage policy: samples in non-decreasing
/// time-point order (stable by source thread for equal time points), plus
/// the resolved thread names.
///
/// Every thread id present has a name unless the thread exited after its
/// queue was drained and before its name could be captured.
#[derive(Debug, Default)]
pub struct SamplesSnapshot {
    samples: Vec<SnapshotSample>,
    thread_names: ThreadNameSet,
}

impl SamplesSnapshot {
    pub(crate) fn new(samples: Vec<SnapshotSample>, thread_names: ThreadNameSet) -> Self {
        Self {
            samples,
            thread_names,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Borrowing accessor for the sample at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn at(&self, index: usize) -> SampleRef<'_> {
        SampleRef {
            sample: &self.samples[index],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = SampleRef<'_>> {
        self.samples.iter().map(|sample| SampleRef { sample })
    }

    /// Name of thread `id`, if it was resolved for this snapshot.
    pub fn thread_name(&self, id: ThreadId) -> Option<&str> {
        self.thread_names.thread_name(id)
    }

    /// Thread ids with a resolved name.
    pub fn named_thread_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.thread_names.thread_ids()
    }
}

/// Borrowed view of one snapshot sample.
#[derive(Debug, Clone, Copy)]
pub struct SampleRef<'a> {
    sample: &'a SnapshotSample,
}

impl SampleRef<'_> {
    pub fn category(&self) -> &'static str {
        self.sample.site.category
    }

    pub fn name(&self) -> &'static str {
        self.sample.site.name
    }

    pub fn kind(&self) -> SampleKind {
        self.sample.site.kind
    }

    pub fn site(&self) -> &'static SampleSite {
        self.sample.site
    }

    pub fn thread_id(&self) -> ThreadId {
        self.sample.thread_id
    }

    pub fn time_point(&self) -> TimePoint {
        self.sample.time_point
    }
}

/// Stable merge of `samples[..mid]` and `samples[mid..]`, both already
/// sorted by time point, into one sorted run.
///
/// The left run keeps priority on ties, so samples drained earlier (from an
/// earlier processor's queue) stay first — the cross-processor order is the
/// clock's order, nothing stronger.
pub(crate) fn merge_sorted_suffix(samples: &mut Vec<SnapshotSample>, mid: usize) {
    if mid == 0 || mid == samples.len() {
        return;
    }
    // Already in order? The common case when one processor did all the work.
    if samples[mid - 1].time_point <= samples[mid].time_point {
        return;
    }

    let mut merged = Vec::with_capacity(samples.len());
    {
        let (left, right) = samples.split_at(mid);
        let mut left_iter = left.iter().peekable();
        let mut right_iter = right.iter().peekable();
        loop {
            match (left_iter.peek(), right_iter.peek()) {
                (Some(l), Some(r)) => {
                    if r.time_point < l.time_point {
                        merged.push(**r);
                        right_iter.next();
                    } else {
                        merged.push(**l);
                        left_iter.next();
                    }
                }
                (Some(_), None) => {
                    merged.extend(left_iter.copied());
                    break;
                }
                (None, _) => {
                    merged.extend(right_iter.copied());
                    break;
                }
            }
        }
    }
    *samples = merged;
}
