//! Span recording across threads and storage policies.

use ringtrace::{
    span, FakeClock, MpmcRingQueueStorage, MpscRingQueueProcessorLocalStorage,
    RingQueueThreadLocalStorage, SampleKind, SampleStorage, SamplesSnapshot,
    SpmcRingQueueProcessorLocalStorage, ThreadId, TraceConfig, UnboundedStorage,
};
use std::sync::Arc;

type Config<S> = TraceConfig<S, FakeClock>;

fn record_one_span<S: SampleStorage<u64>>(config: &Config<S>) {
    let _span = span!(config, "test category", "test span");
}

fn assert_span_pairing(snapshot: &SamplesSnapshot) {
    assert_eq!(snapshot.len() % 2, 0, "unpaired samples");
    // Per thread, every enter must be followed by its exit.
    let thread_ids: Vec<ThreadId> = {
        let mut ids: Vec<ThreadId> = snapshot.iter().map(|sample| sample.thread_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    for thread_id in thread_ids {
        let mut open = Vec::new();
        for sample in snapshot.iter().filter(|s| s.thread_id() == thread_id) {
            match sample.kind() {
                SampleKind::Enter => open.push(sample.name()),
                SampleKind::Exit => {
                    assert_eq!(open.pop(), Some(sample.name()), "mismatched exit");
                }
            }
        }
        assert!(open.is_empty(), "unclosed spans for {thread_id:?}");
    }
}

fn storage_records_and_pairs_spans<S>(storage: S)
where
    S: SampleStorage<u64> + Send + Sync + 'static,
{
    let config = Arc::new(TraceConfig::new(storage, FakeClock::new()));

    record_one_span(config.as_ref());
    {
        let config = Arc::clone(&config);
        std::thread::spawn(move || record_one_span(config.as_ref()))
            .join()
            .unwrap();
    }

    let snapshot = config.storage().take_all_samples(config.clock());
    assert_eq!(snapshot.len(), 4);
    assert_span_pairing(&snapshot);

    // Monotone timestamps per thread.
    let mut thread_ids: Vec<ThreadId> = snapshot.iter().map(|s| s.thread_id()).collect();
    thread_ids.dedup();
    for &thread_id in &thread_ids {
        let times: Vec<_> = snapshot
            .iter()
            .filter(|s| s.thread_id() == thread_id)
            .map(|s| s.time_point())
            .collect();
        assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    // Reset makes the next snapshot empty.
    config.storage().reset();
    assert!(config
        .storage()
        .take_all_samples(config.clock())
        .is_empty());
}

#[test]
fn unbounded_storage_records_and_pairs_spans() {
    storage_records_and_pairs_spans(UnboundedStorage::new());
}

#[test]
fn mpmc_ring_queue_storage_records_and_pairs_spans() {
    storage_records_and_pairs_spans(MpmcRingQueueStorage::<u64, 1024>::new());
}

#[test]
fn thread_local_storage_records_and_pairs_spans() {
    storage_records_and_pairs_spans(RingQueueThreadLocalStorage::<u64, 1024>::new());
}

#[test]
fn spmc_processor_local_storage_records_and_pairs_spans() {
    storage_records_and_pairs_spans(SpmcRingQueueProcessorLocalStorage::<u64, 1024>::new());
}

#[test]
fn mpsc_processor_local_storage_records_and_pairs_spans() {
    storage_records_and_pairs_spans(MpscRingQueueProcessorLocalStorage::<u64, 1024>::new());
}

#[test]
fn two_threads_same_site_tag_their_own_samples() {
    let config = Arc::new(TraceConfig::new(
        RingQueueThreadLocalStorage::<u64, 1024>::new(),
        FakeClock::new(),
    ));

    let mut worker_ids = Vec::new();
    for _ in 0..2 {
        let config = Arc::clone(&config);
        worker_ids.push(
            std::thread::spawn(move || {
                record_one_span(config.as_ref());
                ringtrace::current_thread_id()
            })
            .join()
            .unwrap(),
        );
    }

    let snapshot = config.storage().take_all_samples(config.clock());
    assert_eq!(snapshot.len(), 4);
    assert_span_pairing(&snapshot);
    for &worker_id in &worker_ids {
        let from_worker = snapshot
            .iter()
            .filter(|sample| sample.thread_id() == worker_id)
            .count();
        assert_eq!(from_worker, 2, "expected one enter and one exit per thread");
    }
}

#[test]
fn nested_and_interleaved_spans_snapshot_in_time_order() {
    let config = TraceConfig::new(UnboundedStorage::<u64>::new(), FakeClock::new());
    {
        let _outer = span!(&config, "category", "outer");
        let _inner = span!(&config, "category", "inner");
    }
    record_one_span(&config);

    let snapshot = config.storage().take_all_samples(config.clock());
    assert_eq!(snapshot.len(), 6);
    let times: Vec<_> = snapshot.iter().map(|s| s.time_point()).collect();
    assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_span_pairing(&snapshot);
}

#[cfg(target_os = "linux")]
mod thread_names {
    use super::*;
    use std::sync::mpsc;

    fn set_current_thread_name(name: &str) {
        let name = std::ffi::CString::new(name).unwrap();
        // SAFETY: pthread_setname_np on the calling thread with a valid,
        // <16-byte C string.
        unsafe {
            libc::pthread_setname_np(libc::pthread_self(), name.as_ptr());
        }
    }

    #[test]
    fn live_thread_names_appear_in_the_snapshot() {
        let config = Arc::new(TraceConfig::new(
            RingQueueThreadLocalStorage::<u64, 1024>::new(),
            FakeClock::new(),
        ));

        let (recorded_send, recorded_recv) = mpsc::channel();
        let (snapshot_done_send, snapshot_done_recv) = mpsc::channel();
        let worker = {
            let config = Arc::clone(&config);
            std::thread::spawn(move || {
                set_current_thread_name("worker/3");
                record_one_span(config.as_ref());
                let id = ringtrace::current_thread_id();
                recorded_send.send(id).unwrap();
                // Stay alive until the snapshot has resolved our name.
                snapshot_done_recv.recv().unwrap();
            })
        };

        let worker_id = recorded_recv.recv().unwrap();
        let snapshot = config.storage().take_all_samples(config.clock());
        snapshot_done_send.send(()).unwrap();
        worker.join().unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.thread_name(worker_id), Some("worker/3"));
    }

    #[test]
    fn exited_thread_names_are_remembered() {
        let config = Arc::new(TraceConfig::new(
            RingQueueThreadLocalStorage::<u64, 1024>::new(),
            FakeClock::new(),
        ));

        let worker_id = {
            let config = Arc::clone(&config);
            std::thread::spawn(move || {
                set_current_thread_name("doomed");
                record_one_span(config.as_ref());
                ringtrace::current_thread_id()
            })
            .join()
            .unwrap()
        };

        let snapshot = config.storage().take_all_samples(config.clock());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.thread_name(worker_id), Some("doomed"));
    }

    #[test]
    fn remember_current_thread_name_survives_exit_for_shared_storage() {
        let config = Arc::new(TraceConfig::new(
            MpmcRingQueueStorage::<u64, 1024>::new(),
            FakeClock::new(),
        ));

        let worker_id = {
            let config = Arc::clone(&config);
            std::thread::spawn(move || {
                set_current_thread_name("keeper");
                record_one_span(config.as_ref());
                ringtrace::remember_current_thread_name_for_next_snapshot(&config);
                ringtrace::current_thread_id()
            })
            .join()
            .unwrap()
        };

        let snapshot = config.storage().take_all_samples(config.clock());
        assert_eq!(snapshot.thread_name(worker_id), Some("keeper"));
    }
}
