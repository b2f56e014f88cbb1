use crate::runner::current_test_thread_index;
use std::sync::{Mutex, PoisonError};

/// Per-test-thread container with deterministic identity.
///
/// A plain `thread_local!` gives a fresh variable per OS thread, but an
/// exhaustive harness re-runs the same logical threads over and over (and
/// may run them on one OS thread); slots here are keyed by the
/// runner-assigned test-thread index instead, so logical thread `i` sees
/// the same slot in every iteration.
///
/// `MAX_THREADS` bounds the index; raise it if a test uses more threads.
pub struct TestThreadLocal<T, const MAX_THREADS: usize = 8> {
    slots: [Mutex<Option<T>>; MAX_THREADS],
}

impl<T: Default, const MAX_THREADS: usize> TestThreadLocal<T, MAX_THREADS> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(None)),
        }
    }

    /// Runs `f` with the calling test thread's slot, default-initializing
    /// it on first access.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.with_index(current_test_thread_index(), f)
    }

    /// Runs `f` with the slot for an explicit thread index.
    pub fn with_index<R>(&self, thread_index: usize, f: impl FnOnce(&mut T) -> R) -> R {
        assert!(
            thread_index < MAX_THREADS,
            "test thread index {thread_index} exceeds MAX_THREADS {MAX_THREADS}"
        );
        let mut slot = self.slots[thread_index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(slot.get_or_insert_with(T::default))
    }

    /// Clears every slot, for reuse across iterations.
    pub fn reset(&self) {
        for slot in &self.slots {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }
}

impl<T: Default, const MAX_THREADS: usize> Default for TestThreadLocal<T, MAX_THREADS> {
    fn default() -> Self {
        Self::new()
    }
}
