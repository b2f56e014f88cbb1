//! Consumer-side sinks for draining ring queues.
//!
//! A drain copies the committed region of a queue into a sink, then may ask
//! the sink to discard a suffix-adjacent prefix of what it just appended: if
//! a producer raced with the copy, the oldest copied items may have been
//! overwritten mid-read and must not be returned.

/// Receives items drained from a ring queue.
///
/// `pop_front_n` discards the first `count` items appended *during the
/// current drain* (not items the underlying collection held beforehand).
pub trait QueueSink<T> {
    /// Hint that `additional` items are about to be appended.
    fn reserve(&mut self, additional: usize);

    /// Append one drained item.
    fn push_back(&mut self, value: T);

    /// Discard the first `count` items appended during this drain.
    fn pop_front_n(&mut self, count: usize);
}

/// Sink appending drained items to a `Vec`.
///
/// Construct one per drain: the drain-start position is captured at
/// construction so `pop_front_n` only ever removes items from this drain.
pub struct VecSink<'a, T> {
    out: &'a mut Vec<T>,
    drain_start: usize,
}

impl<'a, T> VecSink<'a, T> {
    pub fn new(out: &'a mut Vec<T>) -> Self {
        let drain_start = out.len();
        Self { out, drain_start }
    }
}

impl<T> QueueSink<T> for VecSink<'_, T> {
    fn reserve(&mut self, additional: usize) {
        self.out.reserve(additional);
    }

    fn push_back(&mut self, value: T) {
        self.out.push(value);
    }

    fn pop_front_n(&mut self, count: usize) {
        debug_assert!(self.drain_start + count <= self.out.len());
        self.out.drain(self.drain_start..self.drain_start + count);
    }
}

/// Sink that maps each drained item before appending it to a `Vec`.
///
/// The storage layer uses this to turn in-queue records into snapshot
/// samples while draining, without an intermediate buffer.
pub struct TransformSink<'a, U, F> {
    out: &'a mut Vec<U>,
    drain_start: usize,
    transform: F,
}

impl<'a, U, F> TransformSink<'a, U, F> {
    pub fn new(out: &'a mut Vec<U>, transform: F) -> Self {
        let drain_start = out.len();
        Self {
            out,
            drain_start,
            transform,
        }
    }
}

impl<T, U, F> QueueSink<T> for TransformSink<'_, U, F>
where
    F: FnMut(T) -> U,
{
    fn reserve(&mut self, additional: usize) {
        self.out.reserve(additional);
    }

    fn push_back(&mut self, value: T) {
        self.out.push((self.transform)(value));
    }

    fn pop_front_n(&mut self, count: usize) {
        debug_assert!(self.drain_start + count <= self.out.len());
        self.out.drain(self.drain_start..self.drain_start + count);
    }
}
