use crate::scheduler::RseqScheduler;
use ringtrace::{PushHandle, QueueSink, SpscRingQueue};

/// Outcome of a preemptable push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum TryPushOutcome {
    Pushed,
    /// The scheduler preempted the push between picking a processor and
    /// committing; nothing was written. The caller owns the retry policy.
    InterruptedByPreemption,
}

/// Lossy, bounded, partially-ordered MPSC queue built from one SPSC ring
/// per processor, with pushes guarded by an rseq critical section.
///
/// Without the critical section, "pick the current processor's queue, then
/// push to it" is corruptible: a preemption between the two steps can
/// migrate the thread and leave two threads pushing to one SPSC queue. The
/// scheduler makes that window explicit — an exhaustive harness can force a
/// preemption at exactly that point and verify the push is abandoned
/// instead of corrupting the queue.
///
/// Partially-ordered: items pushed while running on one processor drain in
/// push order; no order is promised across processors.
pub struct PreemptableRingQueue<T, const CAP: usize> {
    queue_by_processor: Vec<SpscRingQueue<T, CAP>>,
}

impl<T: Copy, const CAP: usize> PreemptableRingQueue<T, CAP> {
    pub fn new(processor_count: usize) -> Self {
        Self {
            queue_by_processor: (0..processor_count).map(|_| SpscRingQueue::new()).collect(),
        }
    }

    pub fn reset(&self) {
        for queue in &self.queue_by_processor {
            queue.reset();
        }
    }

    /// Pushes `count` items inside a critical section on the current
    /// processor's queue.
    pub fn try_push<F>(
        &self,
        scheduler: &RseqScheduler,
        count: usize,
        writer: F,
    ) -> TryPushOutcome
    where
        F: FnOnce(&mut PushHandle<'_, T, CAP>),
    {
        let outcome = scheduler.critical_section(|cs| {
            let processor_id = cs.processor_id();
            debug_assert!(processor_id < self.queue_by_processor.len());
            // The window the rseq pattern exists to close: between choosing
            // the processor's queue and writing to it.
            cs.allow_preempt()?;
            self.queue_by_processor[processor_id].push(count, writer);
            Ok(())
        });
        match outcome {
            crate::scheduler::RseqOutcome::Committed(()) => TryPushOutcome::Pushed,
            crate::scheduler::RseqOutcome::Preempted => TryPushOutcome::InterruptedByPreemption,
        }
    }

    /// Drains every processor's queue into `sink`. Single consumer.
    pub fn pop_all_into<S: QueueSink<T>>(&self, sink: &mut S) {
        for queue in &self.queue_by_processor {
            queue.pop_all_into(sink);
        }
    }
}
