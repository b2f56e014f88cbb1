use crate::invariants::{
    debug_assert_reservation_bounded, debug_assert_vindex_monotonic, debug_assert_vindex_order,
};
use crate::sink::QueueSink;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::process;
use std::sync::atomic::{fence, AtomicU64, Ordering};

// =============================================================================
// VIRTUAL INDEXES & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Every queue variant tracks three u64 virtual indexes ("vindexes") that grow
// monotonically and never wrap in practice; a vindex maps to a cell via
// `vindex % CAP`:
//
// - `read_vindex`: next position the consumer will draw from. Private to the
//   consumer; not atomic.
// - `write_begin_vindex`: published end of the committed region.
// - `write_end_vindex`: reserved end. May lead `write_begin_vindex` while a
//   producer is mid-write.
//
// Invariant at every observation point:
//   read_vindex ≤ write_begin_vindex ≤ write_end_vindex
//
// The queue is lossy: when `write_end - read > CAP`, cells below
// `write_end - CAP` are logically overwritten. The producer never waits.
//
// ## Producer protocol (SPSC)
//
// 1. Load `write_begin_vindex` (Relaxed; only the producer stores it)
// 2. Reserve: store `write_end_vindex = write_begin + count` (Relaxed)
// 3. SeqCst fence
// 4. Write the reserved cells
// 5. Publish: store `write_begin_vindex = write_end` (Release)
//
// ## Consumer protocol (all variants)
//
// 1. Acquire-load both write vindexes; copy the committed region
// 2. SeqCst fence
// 3. Relaxed re-load `write_end_vindex`. If it changed, a producer reserved
//    during the copy and the oldest copied items may have been overwritten
//    mid-read: discard exactly the items that fell below the new loss
//    horizon (`write_end' - CAP`).
//
// The consumer's fence pairs with the producer's post-reservation fence.
// Items that might be torn are dropped from the output rather than returned;
// the suffix actually returned equals, item for item, values some producer
// committed.
//
// ## Cell access
//
// Cells are `UnsafeCell<MaybeUninit<T>>` with `T: Copy`. A producer may
// overwrite a cell while a lagging consumer copies it; the re-check above
// discards any item whose cell could have been overwritten during the copy,
// so a torn read is never returned. Each SAFETY comment below refers back to
// this protocol.
// =============================================================================

/// Shared vindex state and cell storage for all ring-queue variants.
///
/// The producer-side reservation differs per variant (plain store for SPSC,
/// compare-exchange for MPSC); the consumer-side drain protocol is identical
/// and lives here.
pub(crate) struct RingState<T, const CAP: usize> {
    // === CONSUMER-PRIVATE ===
    /// Written only by the (sole, or mutex-serialized) consumer.
    read_vindex: CachePadded<UnsafeCell<u64>>,

    // === PRODUCER/CONSUMER SHARED === (padded to avoid false sharing)
    write_begin_vindex: CachePadded<AtomicU64>,
    write_end_vindex: CachePadded<AtomicU64>,

    // === DATA CELLS ===
    cells: [UnsafeCell<MaybeUninit<T>>; CAP],
}

// Safety: cell and read_vindex access follows the single-producer /
// single-consumer protocol documented above; the vindex atomics provide the
// required synchronization.
unsafe impl<T: Send, const CAP: usize> Send for RingState<T, CAP> {}
unsafe impl<T: Send, const CAP: usize> Sync for RingState<T, CAP> {}

impl<T: Copy, const CAP: usize> RingState<T, CAP> {
    pub(crate) fn new() -> Self {
        assert!(CAP > 0, "ring queue capacity must be non-zero");
        Self {
            read_vindex: CachePadded::new(UnsafeCell::new(0)),
            write_begin_vindex: CachePadded::new(AtomicU64::new(0)),
            write_end_vindex: CachePadded::new(AtomicU64::new(0)),
            cells: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
        }
    }

    /// Resets all three vindexes to zero.
    ///
    /// Must not run concurrently with any other operation on this queue.
    pub(crate) fn reset(&self) {
        // SAFETY: reset is documented non-concurrent, so the consumer-private
        // write cannot race.
        unsafe {
            *self.read_vindex.get() = 0;
        }
        self.write_begin_vindex.store(0, Ordering::Relaxed);
        self.write_end_vindex.store(0, Ordering::Relaxed);
    }

    pub(crate) fn write_begin_vindex(&self) -> &AtomicU64 {
        &self.write_begin_vindex
    }

    pub(crate) fn write_end_vindex(&self) -> &AtomicU64 {
        &self.write_end_vindex
    }

    /// Stores `value` at the cell for `vindex`.
    ///
    /// Called only by the producer holding the reservation covering `vindex`.
    pub(crate) fn write_cell(&self, vindex: u64, value: T) {
        let cell = &self.cells[(vindex % CAP as u64) as usize];
        // SAFETY: only the reserving producer writes cells in its reserved
        // window. A lagging consumer may be copying this cell concurrently;
        // the drain protocol discards any such possibly-torn item.
        unsafe {
            cell.get().write(MaybeUninit::new(value));
        }
    }

    /// Drains the committed region into `sink`.
    ///
    /// Consumer-only. See the protocol comment at the top of this file.
    pub(crate) fn pop_all_into<S: QueueSink<T>>(&self, sink: &mut S) {
        // SAFETY: single consumer (or mutex-serialized consumers); no other
        // thread reads or writes read_vindex.
        let read = unsafe { *self.read_vindex.get() };

        let begin_for = |write_end: u64| -> u64 {
            if write_end > CAP as u64 {
                read.max(write_end - CAP as u64)
            } else {
                read
            }
        };

        let write_begin = self.write_begin_vindex.load(Ordering::Acquire);
        let write_end = self.write_end_vindex.load(Ordering::Acquire);
        debug_assert_vindex_order!(read, write_begin, write_end);

        let begin = begin_for(write_end);
        let end = write_begin;
        debug_assert!(begin <= end);
        sink.reserve((end - begin) as usize);
        for vindex in begin..end {
            let cell = &self.cells[(vindex % CAP as u64) as usize];
            // SAFETY: cells in [begin, end) were committed by a producer
            // before its Release store to write_begin_vindex, which our
            // Acquire load above synchronizes with. A concurrent overwrite of
            // the oldest cells is possible; such items are discarded below.
            sink.push_back(unsafe { (*cell.get()).assume_init() });
        }
        let copied = end - begin;

        fence(Ordering::SeqCst);

        let write_end_reread = self.write_end_vindex.load(Ordering::Relaxed);
        if write_end_reread != write_end {
            // A push began during the copy. Items below the new loss horizon
            // may have been read while they were being overwritten; un-output
            // them so the sink only keeps intact values.
            debug_assert_vindex_monotonic!("write_end_vindex", write_end, write_end_reread);
            let new_begin = begin_for(write_end_reread);
            debug_assert!(new_begin >= begin);
            let discard = (new_begin - begin).min(copied);
            sink.pop_front_n(discard as usize);
        }

        // SAFETY: see read above.
        unsafe {
            *self.read_vindex.get() = end;
        }
    }
}

#[cold]
pub(crate) fn abort_due_to_overflow() -> ! {
    eprintln!("fatal: writer overflowed virtual index");
    process::abort();
}

/// Writer's view of a reservation: stores values at offsets within the
/// reserved window.
pub struct PushHandle<'a, T, const CAP: usize> {
    state: &'a RingState<T, CAP>,
    begin_vindex: u64,
    count: usize,
}

impl<'a, T: Copy, const CAP: usize> PushHandle<'a, T, CAP> {
    pub(crate) fn new(state: &'a RingState<T, CAP>, begin_vindex: u64, count: usize) -> Self {
        Self {
            state,
            begin_vindex,
            count,
        }
    }

    /// Stores `value` at offset `index` within the reservation.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) {
        debug_assert!(index < self.count, "write outside reserved window");
        self.state.write_cell(self.begin_vindex + index as u64, value);
    }
}

/// A special-purpose, lossy, bounded, SPSC FIFO queue optimized for writes.
///
/// Special-purpose: items must be `Copy`; no destructors run on queued items.
///
/// Lossy: if the producer pushes faster than the consumer drains, the oldest
/// committed items are silently discarded.
///
/// Bounded: at most `CAP` items are retained; operations never allocate.
///
/// SPSC: one thread pushes ("Single Producer") and one thread drains
/// ("Single Consumer"). Callers are responsible for that discipline; the
/// storage policies in this crate enforce it with per-thread ownership or a
/// slot mutex.
pub struct SpscRingQueue<T, const CAP: usize> {
    state: RingState<T, CAP>,
}

impl<T: Copy, const CAP: usize> SpscRingQueue<T, CAP> {
    pub fn new() -> Self {
        Self {
            state: RingState::new(),
        }
    }

    /// Returns the fixed capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Resets the queue. Must not run concurrently with any other operation.
    pub fn reset(&self) {
        self.state.reset();
    }

    /// Reserves `count` cells and runs `writer` to fill them.
    ///
    /// Producer-only. Never blocks; overwriting older committed data is
    /// silent. Aborts the process if the virtual index would overflow.
    pub fn push<F>(&self, count: usize, writer: F)
    where
        F: FnOnce(&mut PushHandle<'_, T, CAP>),
    {
        debug_assert_reservation_bounded!(count, CAP);
        let begin = self.state.write_begin_vindex().load(Ordering::Relaxed);
        let end = match begin.checked_add(count as u64) {
            Some(end) => end,
            None => abort_due_to_overflow(),
        };
        self.state.write_end_vindex().store(end, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        let mut handle = PushHandle::new(&self.state, begin, count);
        writer(&mut handle);

        self.state.write_begin_vindex().store(end, Ordering::Release);
    }

    /// Drains the committed region into `sink`. Consumer-only; never blocks.
    pub fn pop_all_into<S: QueueSink<T>>(&self, sink: &mut S) {
        self.state.pop_all_into(sink);
    }
}

impl<T: Copy, const CAP: usize> Default for SpscRingQueue<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}
