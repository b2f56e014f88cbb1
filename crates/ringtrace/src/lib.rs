//! ringtrace — low-overhead in-process tracing and sampling.
//!
//! Application code wraps regions of interest in [`span!`] scopes. Entering
//! and leaving a scope records a sample (call site, thread, monotonic clock
//! reading) into a storage policy backed by lossy bounded ring queues. The
//! producer side is wait-free: recording never blocks application progress,
//! and if the consumer falls behind, the oldest samples are silently
//! overwritten.
//!
//! A snapshot drains all queues into a time-ordered [`SamplesSnapshot`] with
//! resolved thread names, which [`ChromeTraceEventWriter`] renders in the
//! Chrome trace-event JSON format (loadable in `chrome://tracing` and
//! Perfetto).
//!
//! # Example
//!
//! ```
//! use ringtrace::{
//!     span, ChromeTraceEventWriter, FakeClock, SampleStorage, TraceConfig, UnboundedStorage,
//! };
//!
//! let config = TraceConfig::new(UnboundedStorage::new(), FakeClock::new());
//! {
//!     let _span = span!(&config, "example", "do work");
//! }
//! let snapshot = config.storage().take_all_samples(config.clock());
//! assert_eq!(snapshot.len(), 2); // enter + exit
//!
//! let mut out = Vec::new();
//! ChromeTraceEventWriter::new(&mut out).write_snapshot(&snapshot).unwrap();
//! ```
//!
//! # Storage policies
//!
//! | Policy | Queue | Partitioning |
//! |---|---|---|
//! | [`UnboundedStorage`] | growable vector | global, mutex |
//! | [`MpmcRingQueueStorage`] | MPMC ring | global |
//! | [`RingQueueThreadLocalStorage`] | SPSC ring | one queue per thread |
//! | [`SpmcRingQueueProcessorLocalStorage`] | SPSC ring, try-locked | one queue per processor |
//! | [`MpscRingQueueProcessorLocalStorage`] | MPSC ring | one queue per processor |

mod backoff;
mod chrome_trace;
mod clock;
mod config;
mod invariants;
mod mpmc_ring;
mod mpsc_ring;
mod processor;
mod ring;
mod sample;
mod sink;
mod snapshot;
mod span;
mod storage;
mod thread;

pub use backoff::Backoff;
pub use chrome_trace::ChromeTraceEventWriter;
pub use clock::{Clock, FakeClock, MonotonicClock, TimePoint};
pub use config::{remember_current_thread_name_for_next_snapshot, TraceConfig};
pub use mpmc_ring::MpmcRingQueue;
pub use mpsc_ring::{MpscRingQueue, PushResult};
pub use processor::{max_processor_id, ProcessorId, ProcessorIdLookup, SchedGetCpuLookup};
pub use ring::{PushHandle, SpscRingQueue};
pub use sample::{SampleKind, SampleSite, TaggedSample, ThreadSample};
pub use sink::{QueueSink, TransformSink, VecSink};
pub use snapshot::{SampleRef, SamplesSnapshot, SnapshotSample};
pub use span::SpanGuard;
pub use storage::{
    MpmcRingQueueStorage, MpscRingQueueProcessorLocalStorage, RingQueueThreadLocalStorage,
    SampleStorage, SpmcRingQueueProcessorLocalStorage, UnboundedStorage,
};
pub use thread::{current_thread_id, current_thread_name, ThreadId, ThreadNameSet};
