use crate::clock::Clock;
use crate::sample::{SampleSite, ThreadSample};
use crate::sink::TransformSink;
use crate::snapshot::{SamplesSnapshot, SnapshotSample};
use crate::ring::SpscRingQueue;
use crate::storage::SampleStorage;
use crate::thread::{current_thread_id, ThreadId, ThreadNameSet};
use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// Lock order:
//
// 1. Lock the registry (global) mutex
// 2. Lock a slot mutex
// 3. Unlock the slot mutex
// 4. Unlock the registry mutex
//
// A producer takes only its own slot mutex. Violating this order deadlocks
// against take_all_samples, which holds the registry mutex while visiting
// every slot.

/// Per-thread storage: each producing thread owns a dedicated SPSC ring
/// queue, so producers never contend with each other.
///
/// A thread's queue slot is created on its first `add_sample` and linked
/// into a shared registry. When the thread exits, the slot's still-unread
/// samples are re-parented into a "disowned" buffer (and the thread's name
/// captured) so a later snapshot still reports them.
///
/// Storage instances are independent: a thread recording into two storages
/// gets two slots.
pub struct RingQueueThreadLocalStorage<S, const CAP: usize> {
    shared: Arc<StorageShared<S, CAP>>,
}

struct StorageShared<S, const CAP: usize> {
    /// Distinguishes storage instances inside each thread's slot registry.
    instance_id: u64,
    registry: Mutex<Registry<S, CAP>>,
}

struct Registry<S, const CAP: usize> {
    thread_list: Vec<Arc<ThreadSlot<S, CAP>>>,
    disowned_samples: Vec<DisownedSample<S>>,
    disowned_thread_names: ThreadNameSet,
}

struct ThreadSlot<S, const CAP: usize> {
    thread_id: ThreadId,
    // See the lock-order note above.
    samples: Mutex<SpscRingQueue<ThreadSample<S>, CAP>>,
}

#[derive(Clone, Copy)]
struct DisownedSample<S> {
    site: &'static SampleSite,
    thread_id: ThreadId,
    time: S,
}

impl<S: Copy + Send + 'static, const CAP: usize> RingQueueThreadLocalStorage<S, CAP> {
    pub fn new() -> Self {
        static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            shared: Arc::new(StorageShared {
                instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
                registry: Mutex::new(Registry {
                    thread_list: Vec::new(),
                    disowned_samples: Vec::new(),
                    disowned_thread_names: ThreadNameSet::new(),
                }),
            }),
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry<S, CAP>> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Slot of the calling thread, creating and registering it on first use.
    fn thread_slot(&self) -> Arc<ThreadSlot<S, CAP>> {
        THREAD_SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if let Some(slot) = slots.find::<S, CAP>(self.shared.instance_id) {
                return slot;
            }

            let slot = Arc::new(ThreadSlot {
                thread_id: current_thread_id(),
                samples: Mutex::new(SpscRingQueue::new()),
            });
            self.lock_registry().thread_list.push(Arc::clone(&slot));

            let teardown: Box<dyn FnOnce() + Send> = {
                let shared = Arc::clone(&self.shared);
                let slot = Arc::clone(&slot);
                Box::new(move || StorageShared::disown_thread(&shared, &slot))
            };
            slots.register(Registration {
                storage_instance_id: self.shared.instance_id,
                slot: Arc::clone(&slot) as Arc<dyn Any + Send + Sync>,
                teardown: Some(teardown),
            });
            slot
        })
    }
}

impl<S: Copy + Send + 'static, const CAP: usize> Default for RingQueueThreadLocalStorage<S, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Copy + Send + 'static, const CAP: usize> StorageShared<S, CAP> {
    /// Thread-exit path: re-parent the slot's samples into the disowned
    /// buffer, capture the thread's name, and unlink the slot.
    fn disown_thread(shared: &Arc<Self>, slot: &Arc<ThreadSlot<S, CAP>>) {
        let mut registry = shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        {
            let queue = slot.samples.lock().unwrap_or_else(PoisonError::into_inner);
            let thread_id = slot.thread_id;
            let mut sink =
                TransformSink::new(&mut registry.disowned_samples, |sample: ThreadSample<S>| {
                    DisownedSample {
                        site: sample.site,
                        thread_id,
                        time: sample.time,
                    }
                });
            queue.pop_all_into(&mut sink);
        }

        registry
            .disowned_thread_names
            .remember_name_of_current_thread(slot.thread_id);
        registry
            .thread_list
            .retain(|other| !Arc::ptr_eq(other, slot));
    }
}

impl<S: Copy + Send + 'static, const CAP: usize> SampleStorage<S>
    for RingQueueThreadLocalStorage<S, CAP>
{
    fn add_sample(&self, site: &'static SampleSite, time: S) {
        let slot = self.thread_slot();
        let queue = slot.samples.lock().unwrap_or_else(PoisonError::into_inner);
        queue.push(1, |handle| handle.set(0, ThreadSample { site, time }));
    }

    fn reset(&self) {
        let mut registry = self.lock_registry();
        for slot in &registry.thread_list {
            let queue = slot.samples.lock().unwrap_or_else(PoisonError::into_inner);
            queue.reset();
        }
        registry.disowned_samples.clear();
        registry.disowned_thread_names = ThreadNameSet::new();
    }

    fn take_all_samples<C: Clock<Sample = S>>(&self, clock: &C) -> SamplesSnapshot {
        let mut samples: Vec<SnapshotSample> = Vec::new();
        let mut live_thread_ids: Vec<ThreadId> = Vec::new();
        let reclaimed;
        let mut thread_names;
        {
            let mut registry = self.lock_registry();
            reclaimed = std::mem::take(&mut registry.disowned_samples);
            thread_names = std::mem::take(&mut registry.disowned_thread_names);
            live_thread_ids.reserve(registry.thread_list.len());
            for slot in &registry.thread_list {
                let queue = slot.samples.lock().unwrap_or_else(PoisonError::into_inner);
                let thread_id = slot.thread_id;
                let mut sink = TransformSink::new(&mut samples, |sample: ThreadSample<S>| {
                    SnapshotSample {
                        site: sample.site,
                        thread_id,
                        time_point: clock.make_time_point(sample.time),
                    }
                });
                queue.pop_all_into(&mut sink);
                live_thread_ids.push(thread_id);
            }
        }

        samples.extend(reclaimed.into_iter().map(|sample| SnapshotSample {
            site: sample.site,
            thread_id: sample.thread_id,
            time_point: clock.make_time_point(sample.time),
        }));

        for thread_id in live_thread_ids {
            thread_names.fetch_and_remember_thread_name_for_id(thread_id);
        }

        // Stable: per-thread order is preserved for equal time points.
        samples.sort_by_key(|sample| sample.time_point);
        SamplesSnapshot::new(samples, thread_names)
    }

    fn remember_current_thread_name_for_next_snapshot(&self) {
        self.lock_registry()
            .disowned_thread_names
            .remember_name_of_current_thread(current_thread_id());
    }
}

// =============================================================================
// Per-thread slot registry
// =============================================================================

thread_local! {
    static THREAD_SLOTS: RefCell<ThreadSlotRegistry> =
        RefCell::new(ThreadSlotRegistry { registrations: Vec::new() });
}

struct Registration {
    storage_instance_id: u64,
    slot: Arc<dyn Any + Send + Sync>,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

/// All of one thread's slots, across storage instances. Dropped at thread
/// exit, which runs every registration's teardown (re-parenting samples).
struct ThreadSlotRegistry {
    registrations: Vec<Registration>,
}

impl ThreadSlotRegistry {
    fn find<S: Copy + Send + 'static, const CAP: usize>(
        &self,
        storage_instance_id: u64,
    ) -> Option<Arc<ThreadSlot<S, CAP>>> {
        self.registrations
            .iter()
            .find(|registration| registration.storage_instance_id == storage_instance_id)
            .map(|registration| {
                Arc::clone(&registration.slot)
                    .downcast::<ThreadSlot<S, CAP>>()
                    .unwrap_or_else(|_| unreachable!("slot registered with mismatched type"))
            })
    }

    fn register(&mut self, registration: Registration) {
        self.registrations.push(registration);
    }
}

impl Drop for ThreadSlotRegistry {
    fn drop(&mut self) {
        for registration in &mut self.registrations {
            if let Some(teardown) = registration.teardown.take() {
                teardown();
            }
        }
    }
}
