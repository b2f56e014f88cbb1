use crate::clock::Clock;
use crate::storage::SampleStorage;

/// Pairs a storage policy with the clock its samples come from.
///
/// Spans record through a config; snapshots are taken from it. The two type
/// parameters keep everything monomorphized — recording a sample is a clock
/// query plus a queue push, with no dynamic dispatch.
pub struct TraceConfig<S, C> {
    storage: S,
    clock: C,
}

impl<S, C> TraceConfig<S, C>
where
    C: Clock,
    S: SampleStorage<C::Sample>,
{
    pub fn new(storage: S, clock: C) -> Self {
        Self { storage, clock }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

/// Captures the calling thread's OS-level name for the next snapshot taken
/// through `config`.
pub fn remember_current_thread_name_for_next_snapshot<S, C>(config: &TraceConfig<S, C>)
where
    C: Clock,
    S: SampleStorage<C::Sample>,
{
    config.storage().remember_current_thread_name_for_next_snapshot();
}
