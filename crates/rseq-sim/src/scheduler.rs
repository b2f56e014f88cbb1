use crate::exhaustive_rng::ExhaustiveRng;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Decision source for [`RseqScheduler`]: every `allow_preempt` draws one
/// integer.
///
/// Implemented by [`ExhaustiveRng`] (deterministic enumeration of all
/// decision vectors) and by [`StressRng`] (seeded pseudo-randomness for
/// long-running stress harnesses).
pub trait PreemptRng: Send {
    fn next_integer_0(&mut self, max_plus_one: u32) -> u32;
}

impl PreemptRng for ExhaustiveRng {
    fn next_integer_0(&mut self, max_plus_one: u32) -> u32 {
        ExhaustiveRng::next_integer_0(self, max_plus_one)
    }
}

/// Seeded pseudo-random decision source for stress runs.
#[derive(Debug)]
pub struct StressRng {
    rng: SmallRng,
}

impl StressRng {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl PreemptRng for StressRng {
    fn next_integer_0(&mut self, max_plus_one: u32) -> u32 {
        self.rng.gen_range(0..max_plus_one)
    }
}

/// Shared handle to a scheduler's decision source.
pub type SharedRng = Arc<Mutex<dyn PreemptRng + Send>>;

/// A fixed-seed [`SharedRng`] for examples and smoke tests.
pub fn testing_rng() -> SharedRng {
    Arc::new(Mutex::new(StressRng::seeded(0x5eed)))
}

/// Marker that a critical section was aborted by preemption.
///
/// Only [`CriticalSection::allow_preempt`] can construct this, so the only
/// way a critical-section body can finish with `Err(Preempted)` is for the
/// preemption path (callback + processor release) to actually have run —
/// "commit or preempt-handler, never both, never neither" holds by
/// construction.
#[derive(Debug)]
pub struct Preempted(pub(crate) ());

/// Result of running a critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum RseqOutcome<T> {
    /// The body ran to completion and its tail committed.
    Committed(T),
    /// The body was aborted at an `allow_preempt` point; its tail did not
    /// run. Callers typically retry or fall back.
    Preempted,
}

impl<T> RseqOutcome<T> {
    pub fn committed(self) -> Option<T> {
        match self {
            RseqOutcome::Committed(value) => Some(value),
            RseqOutcome::Preempted => None,
        }
    }

    pub fn was_preempted(&self) -> bool {
        matches!(self, RseqOutcome::Preempted)
    }
}

struct ProcessorState {
    in_use: bool,
    // Model synchronization when a processor switches threads: if processor
    // P ran thread A and then runs thread B, everything A wrote must be
    // visible to B. Releasing a processor stores its baton seq-cst;
    // acquiring a previously released processor loads it seq-cst. has_baton
    // records whether a release has happened yet.
    has_baton: bool,
}

/// Userspace model of Linux restartable sequences, for tests only.
///
/// A thread enters a critical section, reserving a processor id; the
/// scheduler may abort the section at any [`allow_preempt`] call, running
/// the registered preempt callback instead of the section's tail. Any exit
/// path — commit, preemption, or unwinding — releases the reserved
/// processor.
///
/// Share one scheduler between all threads of a test iteration and build a
/// fresh one per iteration.
///
/// [`allow_preempt`]: CriticalSection::allow_preempt
pub struct RseqScheduler {
    // Protects ProcessorState. A plain mutex (not a modelled one) on
    // purpose: reservation bookkeeping must not interfere with the memory
    // order of the algorithm under test.
    processors: Mutex<Vec<ProcessorState>>,
    batons: Vec<AtomicBool>,
    rng: SharedRng,
}

thread_local! {
    static IN_CRITICAL_SECTION: Cell<bool> = const { Cell::new(false) };
}

impl RseqScheduler {
    /// Scheduler with exactly `processor_count` processors.
    pub fn new(processor_count: usize, rng: SharedRng) -> Self {
        assert!(processor_count > 0);
        Self {
            processors: Mutex::new(
                (0..processor_count)
                    .map(|_| ProcessorState {
                        in_use: false,
                        has_baton: false,
                    })
                    .collect(),
            ),
            batons: (0..processor_count).map(|_| AtomicBool::new(true)).collect(),
            rng,
        }
    }

    /// Scheduler sized for a test with `thread_count` threads: one
    /// processor per thread so no thread ever blocks on reservation, and at
    /// least two so a thread can observe itself migrating between critical
    /// sections.
    pub fn with_thread_count(thread_count: usize, rng: SharedRng) -> Self {
        Self::new(thread_count.max(2), rng)
    }

    pub fn processor_count(&self) -> usize {
        self.batons.len()
    }

    /// Runs `body` as a critical section on a reserved processor.
    ///
    /// The body's `Ok` value commits; an `Err(Preempted)` — which can only
    /// originate from [`CriticalSection::allow_preempt`] — means the preempt
    /// handler path ran and the tail did not.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is already inside a critical section
    /// (critical sections cannot be nested).
    pub fn critical_section<'s, T, F>(&'s self, body: F) -> RseqOutcome<T>
    where
        F: FnOnce(&mut CriticalSection<'s>) -> Result<T, Preempted>,
    {
        IN_CRITICAL_SECTION.with(|flag| {
            assert!(
                !flag.get(),
                "critical sections cannot be nested, but nesting was detected"
            );
            flag.set(true);
        });
        let processor_id = self.take_unused_processor_id();
        let mut section = CriticalSection {
            scheduler: self,
            processor_id,
            preempt_callback: None,
            released: false,
        };
        match body(&mut section) {
            Ok(value) => {
                section.end_preemptable();
                RseqOutcome::Committed(value)
            }
            Err(Preempted(())) => {
                debug_assert!(section.released, "Preempted outcome without release");
                RseqOutcome::Preempted
            }
        }
    }

    /// True while the calling thread is inside a critical section.
    ///
    /// For assertions only; do not branch an algorithm on this.
    pub fn in_critical_section() -> bool {
        IN_CRITICAL_SECTION.with(Cell::get)
    }

    /// An arbitrary currently-unused processor id, for callers outside any
    /// critical section. The id is not reserved; by the time the caller
    /// uses it, the scheduler may have handed it to someone else.
    pub fn any_unused_processor_id(&self) -> usize {
        let (processor_id, had_baton) = {
            let processors = self.lock_processors();
            let unused: Vec<usize> = processors
                .iter()
                .enumerate()
                .filter(|(_, processor)| !processor.in_use)
                .map(|(id, _)| id)
                .collect();
            assert!(!unused.is_empty(), "all processors are reserved");
            let pick = self.draw(unused.len() as u32) as usize;
            let id = unused[pick];
            (id, processors[id].has_baton)
        };
        if had_baton {
            self.acquire_baton(processor_id);
        }
        processor_id
    }

    /// True when `processor_id` is currently reserved by a critical
    /// section. Test observability for the release invariant.
    pub fn processor_in_use(&self, processor_id: usize) -> bool {
        self.lock_processors()[processor_id].in_use
    }

    fn lock_processors(&self) -> std::sync::MutexGuard<'_, Vec<ProcessorState>> {
        self.processors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn draw(&self, max_plus_one: u32) -> u32 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_integer_0(max_plus_one)
    }

    fn take_unused_processor_id(&self) -> usize {
        let (processor_id, had_baton) = {
            let mut processors = self.lock_processors();
            let Some((id, processor)) = processors
                .iter_mut()
                .enumerate()
                .find(|(_, processor)| !processor.in_use)
            else {
                panic!("all processors are reserved; size the scheduler with one processor per thread")
            };
            processor.in_use = true;
            (id, processor.has_baton)
        };
        if had_baton {
            self.acquire_baton(processor_id);
        }
        processor_id
    }

    fn acquire_baton(&self, processor_id: usize) {
        let _baton = self.batons[processor_id].load(Ordering::SeqCst);
    }

    fn release_processor(&self, processor_id: usize) {
        self.batons[processor_id].store(true, Ordering::SeqCst);
        let mut processors = self.lock_processors();
        let processor = &mut processors[processor_id];
        debug_assert!(processor.in_use);
        processor.has_baton = true;
        processor.in_use = false;
    }
}

/// Handle to the critical section a thread is currently executing.
pub struct CriticalSection<'a> {
    scheduler: &'a RseqScheduler,
    processor_id: usize,
    preempt_callback: Option<Box<dyn FnOnce() + 'a>>,
    released: bool,
}

impl<'a> CriticalSection<'a> {
    /// Id of the processor reserved for this critical section.
    pub fn processor_id(&self) -> usize {
        self.processor_id
    }

    /// Maybe abort this critical section.
    ///
    /// Draws from the scheduler's RNG and either does nothing or preempts:
    /// runs the registered callback (if any), releases the reserved
    /// processor, and returns `Err(Preempted)` for the body to propagate
    /// with `?`. Sprinkle calls throughout the algorithm, ideally between
    /// every modelled machine instruction.
    ///
    /// Do not call this between the algorithm's final state update and the
    /// end of the body: the update would have committed, but the section
    /// would report `Preempted` and forget it. That constraint is on the
    /// algorithm, not checked here.
    pub fn allow_preempt(&mut self) -> Result<(), Preempted> {
        let should_preempt = self.scheduler.draw(2) == 1;
        if !should_preempt {
            return Ok(());
        }
        if let Some(callback) = self.preempt_callback.take() {
            callback();
        }
        self.release();
        Err(Preempted(()))
    }

    /// Registers a hook to run immediately before a preemption exits this
    /// critical section. At most one per section; exists so tests can
    /// observe preemption without perturbing the algorithm.
    ///
    /// # Panics
    ///
    /// Panics if a callback is already registered.
    pub fn set_preempt_callback(&mut self, callback: impl FnOnce() + 'a) {
        assert!(
            self.preempt_callback.is_none(),
            "set_preempt_callback can be called at most once per critical section"
        );
        self.preempt_callback = Some(Box::new(callback));
    }

    /// Commit path: discard any callback and release the processor.
    fn end_preemptable(&mut self) {
        self.preempt_callback = None;
        self.release();
    }

    fn release(&mut self) {
        debug_assert!(!self.released);
        self.released = true;
        self.scheduler.release_processor(self.processor_id);
        IN_CRITICAL_SECTION.with(|flag| flag.set(false));
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        // Unwinding out of a critical section still releases the processor;
        // leaking a reservation would deadlock every later reservation.
        if !self.released {
            self.release();
        }
    }
}
