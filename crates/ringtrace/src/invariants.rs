//! Debug assertion macros for ring-queue invariants.
//!
//! Active only in debug builds, so there is zero overhead in release builds.
//! Shared by the SPSC, MPSC, and MPMC queue variants.

/// Assert the fundamental vindex ordering a consumer relies on:
/// `read ≤ write_begin ≤ write_end`.
macro_rules! debug_assert_vindex_order {
    ($read:expr, $write_begin:expr, $write_end:expr) => {
        debug_assert!(
            $read <= $write_end,
            "vindex order violated: read {} > write_end {}",
            $read,
            $write_end
        );
        debug_assert!(
            $write_begin <= $write_end,
            "vindex order violated: write_begin {} > write_end {}",
            $write_begin,
            $write_end
        );
    };
}

/// Assert that a single reservation never spans more than the capacity.
macro_rules! debug_assert_reservation_bounded {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count > 0 && $count < $capacity,
            "reservation of {} items must be in 1..{}",
            $count,
            $capacity
        )
    };
}

/// Assert that the re-read of `write_end_vindex` never moved backwards.
macro_rules! debug_assert_vindex_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} moved backwards: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

pub(crate) use debug_assert_reservation_bounded;
pub(crate) use debug_assert_vindex_monotonic;
pub(crate) use debug_assert_vindex_order;
