//! Event-driven alternative to the wait calls.
//!
//! An application with its own reactor asks for the next descriptor a
//! request is blocked on, waits for it however it likes, and reports back:
//!
//! ```ignore
//! while let Some(event) = engine.next_event_wanted(caller, Instant::now(), None)? {
//!     match my_reactor.wait(event.fd, event.interest, event.timeout) {
//!         Ready::Read => { engine.send_can_read_event(caller, event.fd)?; }
//!         Ready::Write => { engine.send_can_write_event(caller, event.fd)?; }
//!         Ready::TimedOut => { engine.send_timeout_event(caller, event.fd, true)?; }
//!     }
//!     while let Some(done) = engine.completed_request(caller)? {
//!         // inspect `done`
//!     }
//! }
//! ```
//!
//! A request described by an [`EventWanted`] leaves the pending queue and is
//! the application's responsibility until one of the `send_*_event` calls
//! reports on its descriptor.

use crate::engine::caller::CallerId;
use crate::engine::core::{Engine, EngineCore};
use crate::error::{Fault, FaultCode};
use crate::request::{Interest, Location, Progress, RequestHandle};

use std::os::fd::RawFd;
use std::time::{Duration, Instant};
use tracing::trace;

/// A descriptor and the readiness a request is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWanted {
    pub fd: RawFd,
    pub interest: Interest,
    /// Time left before the request should be reported as timed out.
    pub timeout: Duration,
    pub request: RequestHandle,
}

impl EngineCore {
    /// Applies the outcome of a handler run on behalf of the event API.
    /// Returns true when the request has completed.
    fn progress_event(&mut self, handle: RequestHandle, progress: Progress) -> bool {
        match progress {
            Progress::NeedPoll(interest) => {
                self.requeue(handle, Some(interest));
                false
            }
            Progress::Done => {
                self.terminate(handle, true);
                true
            }
            Progress::RetryMaybe if self.retry(handle) => {
                self.requeue(handle, None);
                false
            }
            Progress::RetryMaybe | Progress::Failed => {
                self.terminate(handle, false);
                true
            }
        }
    }

    fn requeue(&mut self, handle: RequestHandle, interest: Option<Interest>) {
        if let Some(request) = self.requests.get_mut(handle.0) {
            request.wanted = interest;
            request.location = Location::Pending;
            self.pending.push(handle);
        }
    }

    /// Finds the request `fd` was handed out for and checks it is waiting
    /// for `interest`. The request's outstanding event is cleared.
    fn claim_event(
        &mut self,
        id: CallerId,
        fd: RawFd,
        interest: Option<Interest>,
    ) -> Result<RequestHandle, Fault> {
        let wrong_fd = match interest {
            Some(Interest::Write) => FaultCode::WriteEventForWrongFd,
            _ => FaultCode::ReadEventForWrongFd,
        };
        let wrong_state = match interest {
            Some(Interest::Write) => FaultCode::WriteEventWrongState,
            _ => FaultCode::ReadEventWrongState,
        };

        let caller = self.idle_caller_mut(id)?;
        let handle = *caller
            .fd_index
            .get(&fd)
            .ok_or_else(|| Fault::new(wrong_fd, format!("no event outstanding for fd {fd}")))?;

        let request = self.request_mut(handle)?;
        if request.socket_fd() != Some(fd) {
            return Err(Fault::new(
                wrong_fd,
                format!("fd {fd} no longer belongs to request {}", request.request_id),
            ));
        }
        match (interest, request.wanted) {
            (_, None) => {
                return Err(Fault::new(wrong_state, format!("no event wanted on fd {fd}")));
            }
            (Some(expected), Some(wanted)) if expected != wanted => {
                return Err(Fault::new(
                    wrong_state,
                    format!("fd {fd} wants {wanted:?}, got {expected:?}"),
                ));
            }
            _ => {}
        }

        request.wanted = None;
        self.caller_mut(id)?.fd_index.remove(&fd);
        Ok(handle)
    }

    fn send_ready_event(&mut self, id: CallerId, fd: RawFd, interest: Interest) -> Result<bool, Fault> {
        let handle = self.claim_event(id, fd, Some(interest))?;
        let Some((request, caller)) = self.parts(handle) else {
            return Err(FaultCode::UnknownRequest.into());
        };

        let progress = match interest {
            Interest::Read => request.read_event(caller),
            Interest::Write => request.write_event(caller),
        };
        trace!(fd, ?interest, ?progress, "event delivered");

        Ok(self.progress_event(handle, progress))
    }
}

impl Engine {
    /// Advances `caller`'s pending requests and returns the first that is
    /// blocked on a descriptor, or `None` when nothing is.
    ///
    /// With `only` set, every other request is still advanced but only
    /// `only` can be returned. `now` arms and checks the request's own
    /// deadline; a request whose deadline passed is failed with a timeout
    /// instead of being returned.
    pub fn next_event_wanted(
        &self,
        caller: CallerId,
        now: Instant,
        only: Option<RequestHandle>,
    ) -> Result<Option<EventWanted>, Fault> {
        let mut core = self.lock();
        core.idle_caller_mut(caller)?;

        let mut wanted = None;
        for handle in core.pending.snapshot() {
            let owned = core
                .requests
                .get(handle.0)
                .is_some_and(|request| request.owner == Some(caller));
            if !owned || !core.pending.contains(handle) {
                continue;
            }
            if !core.progress_or_terminate(handle) {
                continue;
            }
            if wanted.is_some() || only.is_some_and(|only| only != handle) {
                continue;
            }

            core.pending.remove(handle);
            let Some((request, context)) = core.parts(handle) else {
                continue;
            };

            if !request.clock.is_running() {
                let timeout = request.timeout;
                request.clock.start(now, timeout);
            }
            let remaining = request.clock.remaining(now);
            if remaining.is_zero() {
                request.set_fault(FaultCode::ServiceTimeout, "request deadline passed");
                core.terminate(handle, false);
                continue;
            }

            let (Some(fd), Some(interest)) = (request.socket_fd(), request.wanted) else {
                request.location = Location::Pending;
                core.pending.push(handle);
                continue;
            };

            request.location = Location::AwaitingEvent;
            context.fd_index.insert(fd, handle);
            wanted = Some(EventWanted {
                fd,
                interest,
                timeout: remaining,
                request: handle,
            });

            if only.is_none() {
                break;
            }
        }

        Ok(wanted)
    }

    /// Reports that `fd` is readable. Returns true if its request completed.
    pub fn send_can_read_event(&self, caller: CallerId, fd: RawFd) -> Result<bool, Fault> {
        self.lock().send_ready_event(caller, fd, Interest::Read)
    }

    /// Reports that `fd` is writable. Returns true if its request completed.
    pub fn send_can_write_event(&self, caller: CallerId, fd: RawFd) -> Result<bool, Fault> {
        self.lock().send_ready_event(caller, fd, Interest::Write)
    }

    /// Reports that the wait on `fd` timed out.
    ///
    /// With `abort` the request is failed with a timeout and completes;
    /// otherwise it goes back to the pending queue to be handed out again.
    pub fn send_timeout_event(&self, caller: CallerId, fd: RawFd, abort: bool) -> Result<bool, Fault> {
        let mut core = self.lock();
        let handle = core.claim_event(caller, fd, None)?;

        if !abort {
            core.requeue(handle, None);
            return Ok(false);
        }

        core.request_mut(handle)?
            .set_fault(FaultCode::ServiceTimeout, "Event forced service timeout");
        core.terminate(handle, false);
        Ok(true)
    }

    /// Pops one completed request of `caller` and hands it back.
    pub fn completed_request(&self, caller: CallerId) -> Result<Option<RequestHandle>, Fault> {
        let mut core = self.lock();
        let Some(handle) = core.idle_caller_mut(caller)?.completed.pop() else {
            return Ok(None);
        };

        core.hand_back(handle);
        Ok(Some(handle))
    }
}
