//! Processor-ID lookup.
//!
//! The per-processor storage policies index an array of queues by the id of
//! the processor currently executing the caller. The id is only ever used as
//! an array index; the back-end guarantees density in
//! `[0, max_processor_id]`.

use std::fs;
use std::thread;

/// Small dense non-negative processor identifier.
pub type ProcessorId = usize;

/// Highest processor id the kernel may ever report.
///
/// Parses `/sys/devices/system/cpu/possible` (a comma-separated list of
/// ranges such as `0-63`). Falls back to `available_parallelism`, which is
/// not guaranteed to match kernel CPU numbering but is close enough for
/// sizing on the platforms without the sysfs file.
pub fn max_processor_id() -> ProcessorId {
    if let Ok(content) = fs::read_to_string("/sys/devices/system/cpu/possible") {
        let max_cpu = content
            .trim()
            .split(',')
            .map(|range| {
                if let Some((_start, end)) = range.split_once('-') {
                    end.parse::<usize>().unwrap_or(0)
                } else {
                    range.parse::<usize>().unwrap_or(0)
                }
            })
            .max()
            .unwrap_or(0);
        return max_cpu;
    }
    thread::available_parallelism().map_or(0, |count| count.get() - 1)
}

/// Returns an id for the processor currently executing the caller.
///
/// The storage policies are generic over this so tests can interpose a
/// scheduler that controls (and deliberately migrates) processor placement.
pub trait ProcessorIdLookup {
    /// Highest id this lookup will ever return.
    fn max_processor_id(&self) -> ProcessorId;

    /// Id of the processor executing the caller right now. The caller may be
    /// migrated at any instant, so the result is only a hint.
    fn current_processor_id(&self) -> ProcessorId;
}

/// Production lookup via `sched_getcpu(3)`.
#[derive(Debug)]
pub struct SchedGetCpuLookup {
    max_id: ProcessorId,
}

impl SchedGetCpuLookup {
    pub fn new() -> Self {
        Self {
            max_id: max_processor_id(),
        }
    }
}

impl Default for SchedGetCpuLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorIdLookup for SchedGetCpuLookup {
    fn max_processor_id(&self) -> ProcessorId {
        self.max_id
    }

    #[cfg(target_os = "linux")]
    fn current_processor_id(&self) -> ProcessorId {
        // SAFETY: sched_getcpu takes no arguments and cannot fault.
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 {
            return 0;
        }
        (cpu as ProcessorId).min(self.max_id)
    }

    #[cfg(not(target_os = "linux"))]
    fn current_processor_id(&self) -> ProcessorId {
        0
    }
}
