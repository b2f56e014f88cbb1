//! End-to-end span recording cost per storage policy.
//!
//! Run with: `cargo bench --bench span`

use criterion::{criterion_group, criterion_main, Criterion};
use ringtrace::{
    span, MonotonicClock, MpmcRingQueueStorage, MpscRingQueueProcessorLocalStorage,
    RingQueueThreadLocalStorage, SampleStorage, SpmcRingQueueProcessorLocalStorage, TraceConfig,
    UnboundedStorage,
};

const CAP: usize = 1024;

fn bench_storage<S>(c: &mut Criterion, name: &str, storage: S)
where
    S: SampleStorage<u64>,
{
    let config = TraceConfig::new(storage, MonotonicClock::new());
    let mut group = c.benchmark_group("span");
    group.bench_function(name, |b| {
        b.iter(|| {
            let _span = span!(&config, "bench", "span");
        });
        // Keep the queues from staying saturated between samples.
        config.storage().reset();
    });
    group.finish();
}

fn bench_span_unbounded(c: &mut Criterion) {
    bench_storage(c, "unbounded", UnboundedStorage::<u64>::new());
}

fn bench_span_mpmc(c: &mut Criterion) {
    bench_storage(c, "mpmc_ring", MpmcRingQueueStorage::<u64, CAP>::new());
}

fn bench_span_thread_local(c: &mut Criterion) {
    bench_storage(
        c,
        "thread_local_ring",
        RingQueueThreadLocalStorage::<u64, CAP>::new(),
    );
}

fn bench_span_spmc_processor_local(c: &mut Criterion) {
    bench_storage(
        c,
        "spmc_processor_local",
        SpmcRingQueueProcessorLocalStorage::<u64, CAP>::new(),
    );
}

fn bench_span_mpsc_processor_local(c: &mut Criterion) {
    bench_storage(
        c,
        "mpsc_processor_local",
        MpscRingQueueProcessorLocalStorage::<u64, CAP>::new(),
    );
}

criterion_group!(
    benches,
    bench_span_unbounded,
    bench_span_mpmc,
    bench_span_thread_local,
    bench_span_spmc_processor_local,
    bench_span_mpsc_processor_local
);
criterion_main!(benches);
