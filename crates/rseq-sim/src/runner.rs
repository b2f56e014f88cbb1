//! Test harnesses: exhaustive (deterministic) and stress (real threads).

use crate::exhaustive_rng::ExhaustiveRng;
use crate::scheduler::{PreemptRng, RseqScheduler, SharedRng};
use std::cell::Cell;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

thread_local! {
    static TEST_THREAD_INDEX: Cell<usize> = const { Cell::new(0) };
}

/// Index the harness assigned to the calling (logical) test thread.
pub fn current_test_thread_index() -> usize {
    TEST_THREAD_INDEX.with(Cell::get)
}

/// Assigns the calling thread's test-thread index. The stress harness calls
/// this for each worker; exhaustive iterations call it when switching
/// between logical threads.
pub fn set_current_test_thread_index(index: usize) {
    TEST_THREAD_INDEX.with(|cell| cell.set(index));
}

/// Runs `iteration` once per preemption-decision vector, until the space is
/// exhausted.
///
/// The iteration receives a fresh scheduler wired to the shared exhaustive
/// RNG, and runs its logical threads itself (typically serially, via
/// [`set_current_test_thread_index`]); the enumeration covers every
/// combination of preempt decisions the iteration draws.
///
/// # Panics
///
/// Panics if the decision space fails to converge within a million
/// iterations, which indicates an iteration drawing an unbounded number of
/// decisions.
pub fn run_exhaustive<F>(thread_count: usize, mut iteration: F) -> u64
where
    F: FnMut(&RseqScheduler),
{
    let rng = Arc::new(Mutex::new(ExhaustiveRng::new()));
    let mut iterations = 0u64;
    loop {
        let scheduler = RseqScheduler::with_thread_count(
            thread_count,
            Arc::clone(&rng) as Arc<Mutex<dyn PreemptRng + Send>>,
        );
        set_current_test_thread_index(0);
        iteration(&scheduler);

        iterations += 1;
        assert!(
            iterations < 1_000_000,
            "preemption-decision space did not converge after {iterations} iterations"
        );
        let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.lap();
        if rng.done() {
            return iterations;
        }
    }
}

/// One concurrency test run repeatedly by the stress harness.
pub trait ConcurrencyTest: Sync {
    fn thread_count(&self) -> usize;

    /// Resets shared state before a run. Runs on the harness thread.
    fn set_up(&self);

    /// Body of logical thread `thread_index`; runs concurrently with the
    /// other threads' bodies.
    fn run_thread(&self, thread_index: usize);

    /// Checks postconditions after all threads joined. Returns a failure
    /// message, or `None` when the run passed.
    fn tear_down(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct StressOptions {
    /// Keep re-running until this much time has elapsed.
    pub duration: Duration,
    /// Runs between deadline checks.
    pub rounds_between_deadline_checks: u32,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(500),
            rounds_between_deadline_checks: 3,
        }
    }
}

/// What a stress run observed.
#[derive(Debug)]
pub struct StressReport {
    pub run_count: u64,
    pub failures: Vec<String>,
}

impl StressReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Repeatedly runs `test` with real threads until the deadline passes or a
/// run fails.
///
/// Worker threads get dense test-thread indexes. Tests that use a scheduler
/// own it: build a fresh one in `set_up` (see [`stress_rng`] for per-run
/// RNG state).
pub fn run_stress<T: ConcurrencyTest>(test: &T, options: &StressOptions) -> StressReport {
    let mut report = StressReport {
        run_count: 0,
        failures: Vec::new(),
    };
    let deadline = Instant::now() + options.duration;
    'outer: while Instant::now() < deadline {
        for _ in 0..options.rounds_between_deadline_checks {
            report.run_count += 1;
            test.set_up();
            std::thread::scope(|scope| {
                for thread_index in 0..test.thread_count() {
                    scope.spawn(move || {
                        set_current_test_thread_index(thread_index);
                        test.run_thread(thread_index);
                    });
                }
            });
            if let Some(failure) = test.tear_down() {
                report.failures.push(failure);
                break 'outer;
            }
        }
    }
    report
}

/// A fresh seeded RNG handle for one stress run.
pub fn stress_rng(seed: u64) -> SharedRng {
    use crate::scheduler::StressRng;
    Arc::new(Mutex::new(StressRng::seeded(seed)))
}
