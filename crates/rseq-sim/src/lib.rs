//! rseq-sim — userspace emulation of Linux restartable sequences.
//!
//! A restartable sequence is a kernel-assisted critical section: a thread
//! registers an abort handler, runs a per-processor algorithm, and if the
//! kernel preempts the thread before the committing instruction, control
//! resumes at the handler instead. Per-processor data structures built on
//! rseq are hard to test against real preemption, which strikes rarely and
//! nondeterministically.
//!
//! This crate emulates the userspace side of that contract so such
//! structures can be exercised deterministically: [`RseqScheduler`] runs a
//! critical section, may abort it at any [`allow_preempt`] point (decisions
//! drawn from a test RNG), and guarantees that either the section's tail
//! committed or the preemption path ran — never both, never neither.
//!
//! Not used in production; this is test infrastructure.
//!
//! ```
//! use rseq_sim::{testing_rng, RseqOutcome, RseqScheduler};
//!
//! let scheduler = RseqScheduler::with_thread_count(2, testing_rng());
//! let outcome = scheduler.critical_section(|cs| {
//!     let processor = cs.processor_id();
//!     cs.allow_preempt()?; // may abort the section here
//!     Ok(processor)
//! });
//! match outcome {
//!     RseqOutcome::Committed(processor) => assert!(processor < scheduler.processor_count()),
//!     RseqOutcome::Preempted => {} // the handler path: retry, clean up, …
//! }
//! ```
//!
//! [`allow_preempt`]: CriticalSection::allow_preempt

mod exhaustive_rng;
mod preemptable_queue;
mod runner;
mod scheduler;
mod thread_slot;

pub use exhaustive_rng::ExhaustiveRng;
pub use preemptable_queue::{PreemptableRingQueue, TryPushOutcome};
pub use runner::{
    current_test_thread_index, run_exhaustive, run_stress, set_current_test_thread_index,
    stress_rng, ConcurrencyTest, StressOptions, StressReport,
};
pub use scheduler::{
    testing_rng, CriticalSection, Preempted, PreemptRng, RseqOutcome, RseqScheduler, SharedRng,
    StressRng,
};
pub use thread_slot::TestThreadLocal;
