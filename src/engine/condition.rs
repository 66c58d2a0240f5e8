//! Conditions a wait call runs the engine until.

use crate::engine::caller::CallerContext;
use crate::request::{Request, RequestHandle, RequestState};
use crate::time::TimeoutClock;
use crate::utils::slab::Slab;

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub(crate) enum WaitCondition {
    /// Every outstanding request is done.
    All,
    /// Every outstanding request has been fully written.
    Sent,
    /// At least one request is in the completed queue.
    Any,
    /// The given request is done.
    One(RequestHandle),
    /// Like `Any`, but gives up once its own budget runs out without
    /// failing anything.
    Blocked(TimeoutClock),
}

impl WaitCondition {
    pub(crate) fn blocked(now: Instant, budget: Duration) -> Self {
        let mut clock = TimeoutClock::new();
        clock.start(now, budget);
        WaitCondition::Blocked(clock)
    }

    pub(crate) fn satisfied(&self, caller: &CallerContext, requests: &Slab<Request>) -> bool {
        match self {
            WaitCondition::All => caller.outstanding == 0,
            WaitCondition::Sent => caller.outstanding == caller.reading,
            WaitCondition::Any | WaitCondition::Blocked(_) => !caller.completed.is_empty(),
            WaitCondition::One(handle) => requests
                .get(handle.0)
                .is_none_or(|request| request.state == RequestState::Done),
        }
    }

    /// Whether deciding this condition means walking the caller's requests
    /// rather than reading its counters and completed queue. None of the
    /// built-in conditions do.
    pub(crate) fn needs_requests(&self) -> bool {
        false
    }

    /// Shrinks `budget` to this condition's own deadline, if it has one.
    ///
    /// Returns the budget to poll with and whether it was shortened, in
    /// which case a poll timeout is not a request timeout.
    pub(crate) fn time_budget(&mut self, now: Instant, budget: Duration) -> (Duration, bool) {
        match self {
            WaitCondition::Blocked(clock) => {
                let own = clock.remaining(now);
                if own < budget { (own, true) } else { (budget, false) }
            }
            _ => (budget, false),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            WaitCondition::All => "all",
            WaitCondition::Sent => "sent",
            WaitCondition::Any => "any",
            WaitCondition::One(_) => "one",
            WaitCondition::Blocked(_) => "blocked",
        }
    }
}
