//! Deadline clock used for per-request and per-caller timeouts.
//!
//! A [`TimeoutClock`] is armed from a timestamp and a duration and reports the
//! time remaining until the deadline. Timestamps are supplied by the caller
//! so the event API can drive the clock from an external loop's notion of
//! "now".
//!
//! # Example
//!
//! ```ignore
//! use sockrpc::time::TimeoutClock;
//! use std::time::{Duration, Instant};
//!
//! let mut clock = TimeoutClock::new();
//! let now = Instant::now();
//! clock.start(now, Duration::from_millis(500));
//! assert_eq!(clock.remaining(now), Duration::from_millis(500));
//! ```

use std::time::{Duration, Instant};

/// A restartable deadline.
///
/// A stopped clock reports no time remaining.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutClock {
    /// When the clock was last armed.
    started: Instant,
    /// Total budget from `started`.
    timeout: Duration,
    running: bool,
}

impl Default for TimeoutClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            timeout: Duration::ZERO,
            running: false,
        }
    }

    /// Arms the clock so that it expires `timeout` after `now`.
    pub fn start(&mut self, now: Instant, timeout: Duration) {
        self.started = now;
        self.timeout = timeout;
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns the configured budget of the last `start`.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the time left before the deadline, or zero once it has passed.
    ///
    /// If `now` is earlier than the moment the clock was armed, the clock
    /// went backwards: the deadline is re-armed from `now` with the full
    /// budget rather than reporting more time than was ever granted.
    pub fn remaining(&mut self, now: Instant) -> Duration {
        if !self.running {
            return Duration::ZERO;
        }

        match now.checked_duration_since(self.started) {
            Some(elapsed) => self.timeout.saturating_sub(elapsed),
            None => {
                self.started = now;
                self.timeout
            }
        }
    }

    pub fn is_expired(&mut self, now: Instant) -> bool {
        self.remaining(now).is_zero()
    }
}
