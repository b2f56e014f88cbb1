use std::sync::atomic::{AtomicU64, Ordering};

/// A point in time, comparable and subtractable, measured in nanoseconds
/// since an arbitrary per-process reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint {
    nanoseconds_since_reference: u64,
}

impl TimePoint {
    pub fn from_nanoseconds(nanoseconds_since_reference: u64) -> Self {
        Self {
            nanoseconds_since_reference,
        }
    }

    pub fn nanoseconds_since_reference(self) -> u64 {
        self.nanoseconds_since_reference
    }
}

/// Source of monotonic timestamp samples.
///
/// `query` must be cheap (it runs on every span entry and exit) and strictly
/// monotonic per thread. Converting a raw sample into a comparable
/// [`TimePoint`] may be more expensive and happens only at snapshot time.
pub trait Clock {
    /// Raw sample type stored inside queues. Kept trivially copyable so the
    /// in-queue record stays trivially copyable.
    type Sample: Copy + Send + 'static;

    fn query(&self) -> Self::Sample;

    fn make_time_point(&self, sample: Self::Sample) -> TimePoint;
}

/// Production clock: `CLOCK_MONOTONIC` nanoseconds.
#[derive(Debug, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    type Sample = u64;

    #[cfg(unix)]
    fn query(&self) -> u64 {
        let mut spec = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: spec is a valid out-pointer; CLOCK_MONOTONIC is always
        // available on the supported platforms.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut spec) };
        debug_assert_eq!(rc, 0);
        (spec.tv_sec as u64) * 1_000_000_000 + spec.tv_nsec as u64
    }

    #[cfg(not(unix))]
    fn query(&self) -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = *EPOCH.get_or_init(Instant::now);
        Instant::now().duration_since(epoch).as_nanos() as u64
    }

    fn make_time_point(&self, sample: u64) -> TimePoint {
        TimePoint::from_nanoseconds(sample)
    }
}

/// Deterministic test clock.
///
/// Samples start at 1 ns and advance by a configurable step on every query,
/// so the clock is strictly increasing even when shared across threads.
#[derive(Debug)]
pub struct FakeClock {
    next_sample: AtomicU64,
    step_nanoseconds: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            next_sample: AtomicU64::new(1),
            step_nanoseconds: AtomicU64::new(1),
        }
    }

    /// The next query will return a sample at `nanoseconds`.
    pub fn set_next_time_point_nanoseconds(&self, nanoseconds: u64) {
        self.next_sample.store(nanoseconds, Ordering::SeqCst);
    }

    /// The next query will return a sample at `microseconds`.
    pub fn set_next_time_point_microseconds(&self, microseconds: u64) {
        self.set_next_time_point_nanoseconds(microseconds * 1000);
    }

    /// Distance between consecutive samples (default 1 ns).
    pub fn set_duration_between_samples_nanoseconds(&self, nanoseconds: u64) {
        self.step_nanoseconds.store(nanoseconds, Ordering::SeqCst);
    }

    /// Distance between consecutive samples, in microseconds.
    pub fn set_duration_between_samples_microseconds(&self, microseconds: u64) {
        self.set_duration_between_samples_nanoseconds(microseconds * 1000);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    type Sample = u64;

    fn query(&self) -> u64 {
        let step = self.step_nanoseconds.load(Ordering::SeqCst);
        self.next_sample.fetch_add(step, Ordering::SeqCst)
    }

    fn make_time_point(&self, sample: u64) -> TimePoint {
        TimePoint::from_nanoseconds(sample)
    }
}
