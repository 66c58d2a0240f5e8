//! Per-caller state.
//!
//! Each thread or cooperative task talking to the engine owns one
//! [`CallerContext`], identified outside the engine by a [`CallerId`]. It
//! holds the requests the caller has added but not yet collected, the
//! batch deadline and the poll array reused across cycles.

use crate::engine::queue::RequestQueue;
use crate::error::Fault;
use crate::request::RequestHandle;
use crate::time::TimeoutClock;
use crate::utils::slab::SlabKey;

use libc::pollfd;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::Duration;

const INITIAL_POLL_SLOTS: usize = 20;

/// Stable reference to a caller registered with an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(pub(crate) SlabKey);

pub(crate) struct CallerContext {
    /// `name:pid`, sent as the client id of every request.
    pub(crate) identity: String,
    pub(crate) timeout: Duration,

    /// Requests added and not yet done.
    pub(crate) outstanding: usize,
    /// Requests fully sent and waiting for their response.
    pub(crate) reading: usize,
    pub(crate) completed: RequestQueue,
    /// Batch deadline, armed lazily once requests are outstanding.
    pub(crate) clock: TimeoutClock,

    pub(crate) poll_array: Vec<pollfd>,
    /// Requests handed out through the event API, by descriptor.
    pub(crate) fd_index: HashMap<RawFd, RequestHandle>,

    /// Set for the duration of an engine call on behalf of this caller.
    pub(crate) busy: bool,
    pub(crate) fault: Option<Fault>,
}

impl CallerContext {
    pub(crate) fn new(name: &str, timeout: Duration) -> Self {
        Self {
            identity: format!("{name}:{}", std::process::id()),
            timeout,
            outstanding: 0,
            reading: 0,
            completed: RequestQueue::new(),
            clock: TimeoutClock::new(),
            poll_array: Vec::with_capacity(INITIAL_POLL_SLOTS),
            fd_index: HashMap::with_capacity(INITIAL_POLL_SLOTS),
            busy: false,
            fault: None,
        }
    }

    /// Counts a newly added request. The first one of a batch stops the
    /// clock so the next wait re-arms it with a full budget.
    pub(crate) fn add_outstanding(&mut self) {
        if self.outstanding == 0 {
            self.clock.stop();
        }
        self.outstanding += 1;
    }

    pub(crate) fn remove_outstanding(&mut self) {
        debug_assert!(self.outstanding > 0, "outstanding count underflow");
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    pub(crate) fn entered_reading(&mut self) {
        self.reading += 1;
    }

    pub(crate) fn left_reading(&mut self) {
        debug_assert!(self.reading > 0, "reading count underflow");
        self.reading = self.reading.saturating_sub(1);
    }

    /// Empties the poll array, rebuilding it larger if it cannot hold `needed`.
    pub(crate) fn reset_poll_array(&mut self, needed: usize) {
        if self.poll_array.capacity() < needed {
            self.poll_array = Vec::with_capacity(needed + needed / 2 + 1);
        } else {
            self.poll_array.clear();
        }
    }
}
