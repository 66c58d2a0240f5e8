//! Time utilities for request deadlines.
//!
//! - [`TimeoutClock`] arms a deadline and reports the time remaining
//! - [`poll_timeout_ms`] converts a remaining budget into a `poll(2)` timeout

mod clock;

pub use clock::TimeoutClock;

use std::time::Duration;

/// Converts a budget into the millisecond argument of `poll(2)`.
///
/// Sub-millisecond remainders are rounded up so a nearly expired budget
/// still blocks briefly instead of spinning.
pub(crate) fn poll_timeout_ms(budget: Duration) -> i32 {
    let ms = budget.as_millis();
    let ms = if ms == 0 && !budget.is_zero() { 1 } else { ms };

    ms.min(i32::MAX as u128) as i32
}
