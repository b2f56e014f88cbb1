//! Thread identity and thread-name capture.
//!
//! A thread's OS-level name is only reliably readable by the thread itself
//! (and, on Linux, through procfs while the thread is alive). The storage
//! policies therefore remember names eagerly — either when the owning thread
//! asks, or when the thread's queue slot is torn down — and resolve the rest
//! from procfs at snapshot time.

use std::collections::HashMap;
use std::fs;

/// Platform thread identifier, stable for the lifetime of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Distinguished "slot empty" value; never a real thread's id.
    pub const INVALID: ThreadId = ThreadId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Id of the calling thread.
#[cfg(target_os = "linux")]
pub fn current_thread_id() -> ThreadId {
    // SAFETY: gettid takes no arguments and always succeeds.
    let tid = unsafe { libc::gettid() };
    ThreadId(tid as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn current_thread_id() -> ThreadId {
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THIS_THREAD: Cell<u64> = const { Cell::new(0) };
    }
    THIS_THREAD.with(|slot| {
        if slot.get() == 0 {
            slot.set(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        }
        ThreadId(slot.get())
    })
}

/// OS-level name of the calling thread, if it has one.
pub fn current_thread_name() -> Option<String> {
    read_comm("/proc/thread-self/comm")
}

/// OS-level name of a live thread in this process.
///
/// Returns `None` once the thread has exited; callers keep names for exited
/// threads by remembering them before teardown.
fn thread_name_for_id(id: ThreadId) -> Option<String> {
    read_comm(&format!("/proc/self/task/{}/comm", id.0))
}

fn read_comm(path: &str) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let name = raw.trim_end_matches('\n');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Resolved thread names keyed by thread id.
#[derive(Debug, Default, Clone)]
pub struct ThreadNameSet {
    names: HashMap<ThreadId, String>,
}

impl ThreadNameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of `id`, if known.
    pub fn thread_name(&self, id: ThreadId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Thread ids with a known name.
    pub fn thread_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.names.keys().copied()
    }

    /// Remembers the calling thread's current name under `id`.
    pub fn remember_name_of_current_thread(&mut self, id: ThreadId) {
        if let Some(name) = current_thread_name() {
            self.names.insert(id, name);
        }
    }

    /// Looks up the live thread `id` and remembers its name.
    ///
    /// Keeps any previously remembered name when the thread has already
    /// exited (the live lookup fails).
    pub fn fetch_and_remember_thread_name_for_id(&mut self, id: ThreadId) {
        if let Some(name) = thread_name_for_id(id) {
            self.names.insert(id, name);
        }
    }

    /// Moves every name from `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: ThreadNameSet) {
        self.names.extend(other.names);
    }
}
