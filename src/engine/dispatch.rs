//! Driving requests forward.
//!
//! [`Engine::progress_requests`] is the loop behind every wait call:
//!
//! 1. advance every visible pending request until it needs readiness
//! 2. collect what is left into the caller's poll array
//! 3. stop if the wait condition holds
//! 4. poll (or call the proxy) with the remaining budget
//! 5. hand each ready descriptor to its request's read or write handler
//!
//! When a poll proxy is installed only the calling caller's requests are
//! visible, so cooperative tasks sharing the engine never advance each
//! other's requests.

use crate::engine::caller::CallerId;
use crate::engine::condition::WaitCondition;
use crate::engine::core::{Engine, EngineCore, MAXIMUM_TRY_COUNT};
use crate::error::{Fault, FaultCode};
use crate::reactor::poller::{Poller, SystemPoller};
use crate::request::{Attributes, Interest, Location, Progress, RequestHandle, RequestState};
use crate::time::poll_timeout_ms;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, pollfd};
use std::io;
use std::time::Instant;
use tracing::{debug, trace, warn};

const READ_READY: i16 = POLLIN | POLLHUP | POLLERR | POLLNVAL;
const WRITE_READY: i16 = POLLOUT | POLLHUP | POLLERR | POLLNVAL;

/// How a run of [`Engine::progress_requests`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The wait condition holds.
    Satisfied,
    /// The caller's budget ran out; its pending requests were failed.
    TimedOut,
    /// The condition's own, shorter budget ran out. Nothing was failed.
    Blocked,
    /// No visible request is pending and the condition does not hold.
    Drained,
}

impl EngineCore {
    /// Advances `handle` until it needs readiness, retrying in place when
    /// allowed. Returns false once the request has been moved to its
    /// owner's completed queue.
    pub(crate) fn progress_or_terminate(&mut self, handle: RequestHandle) -> bool {
        loop {
            let Some((request, caller)) = self.parts(handle) else {
                self.pending.remove(handle);
                return false;
            };

            request.wanted = None;
            request.poll_index = None;

            match request.progress_towards_poll(caller) {
                Progress::NeedPoll(interest) => {
                    request.wanted = Some(interest);
                    return true;
                }
                Progress::Done => {
                    self.pending.remove(handle);
                    self.terminate(handle, true);
                    return false;
                }
                Progress::RetryMaybe if self.retry(handle) => continue,
                Progress::RetryMaybe | Progress::Failed => {
                    self.pending.remove(handle);
                    self.terminate(handle, false);
                    return false;
                }
            }
        }
    }

    /// Closes the request's connection and, if policy allows another
    /// attempt, rewinds it to the connection setup state.
    pub(crate) fn retry(&mut self, handle: RequestHandle) -> bool {
        let Some((request, caller)) = self.parts(handle) else {
            return false;
        };

        request.close_socket();

        if request.has(Attributes::NO_RETRY) || request.has(Attributes::NEED_AFFINITY) {
            return false;
        }
        if request.try_count >= MAXIMUM_TRY_COUNT {
            return false;
        }

        debug!(
            request_id = request.request_id,
            try_count = request.try_count,
            fault = ?request.fault,
            "retrying request"
        );
        request.prepare(caller, false);
        true
    }

    /// Finishes a request that is no longer pending and queues it as
    /// completed for its owner.
    pub(crate) fn terminate(&mut self, handle: RequestHandle, ok: bool) {
        let Some((request, caller)) = self.parts(handle) else {
            return;
        };

        if ok && request.has(Attributes::KEEP_AFFINITY) {
            request.affinity = true;
        } else {
            request.close_socket();
        }

        request.wanted = None;
        request.poll_index = None;
        request.clock.stop();
        request.set_state(caller, RequestState::Done);
        request.location = Location::Completed;

        caller.fd_index.retain(|_, h| *h != handle);
        caller.remove_outstanding();
        caller.completed.push(handle);

        debug!(
            request_id = request.request_id,
            ok,
            fault = ?request.fault,
            "request finished"
        );
    }

    /// Applies the outcome of a read or write handler run from the poll loop.
    fn interpret(&mut self, handle: RequestHandle, progress: Progress) {
        match progress {
            Progress::NeedPoll(interest) => {
                if let Some(request) = self.requests.get_mut(handle.0) {
                    request.wanted = Some(interest);
                }
            }
            Progress::Done => {
                self.pending.remove(handle);
                self.terminate(handle, true);
            }
            Progress::RetryMaybe if self.retry(handle) => {}
            Progress::RetryMaybe | Progress::Failed => {
                self.pending.remove(handle);
                self.terminate(handle, false);
            }
        }
    }

    /// Fails every pending request of `owner`, or of every caller when
    /// `owner` is `None`.
    pub(crate) fn fail_owner(&mut self, owner: Option<CallerId>, fault: &Fault) {
        for handle in self.pending.snapshot() {
            let Some(request) = self.requests.get_mut(handle.0) else {
                continue;
            };
            if owner.is_some() && request.owner != owner {
                continue;
            }

            request.fault = Some(fault.clone());
            self.pending.remove(handle);
            self.terminate(handle, false);
        }
    }

    fn is_visible(&self, handle: RequestHandle, id: CallerId, proxied: bool) -> bool {
        self.requests
            .get(handle.0)
            .is_some_and(|request| !proxied || request.owner == Some(id))
    }

    fn visible_pending(&self, id: CallerId, proxied: bool) -> usize {
        if !proxied {
            return self.pending.len();
        }

        self.pending
            .iter()
            .filter(|handle| self.is_visible(*handle, id, true))
            .count()
    }

    /// Advances every visible pending request and records the ones that
    /// need readiness in the caller's poll array. Returns how many were
    /// recorded.
    fn construct_poll_list(&mut self, id: CallerId, proxied: bool) -> Result<usize, Fault> {
        let needed = self.pending.len();
        self.caller_mut(id)?.reset_poll_array(needed);

        let mut fds = std::mem::take(&mut self.caller_mut(id)?.poll_array);

        for handle in self.pending.snapshot() {
            if !self.pending.contains(handle) || !self.is_visible(handle, id, proxied) {
                continue;
            }
            if !self.progress_or_terminate(handle) {
                continue;
            }

            let Some(request) = self.requests.get_mut(handle.0) else {
                continue;
            };
            let (Some(fd), Some(interest)) = (request.socket_fd(), request.wanted) else {
                continue;
            };

            request.poll_index = Some(fds.len());
            fds.push(pollfd {
                fd,
                events: match interest {
                    Interest::Read => POLLIN,
                    Interest::Write => POLLOUT,
                },
                revents: 0,
            });
        }

        let submitted = fds.len();
        self.caller_mut(id)?.poll_array = fds;
        Ok(submitted)
    }

    /// Delivers poll results to the requests that asked for them.
    fn dispatch_ready(&mut self, id: CallerId, fds: &[pollfd], proxied: bool) {
        for handle in self.pending.snapshot() {
            if !self.is_visible(handle, id, proxied) {
                continue;
            }
            let Some((request, caller)) = self.parts(handle) else {
                continue;
            };

            let Some(entry) = request.poll_index.take().and_then(|ix| fds.get(ix)) else {
                continue;
            };
            if entry.fd != request.socket_fd().unwrap_or(-1) || entry.revents == 0 {
                continue;
            }

            let progress = match request.wanted {
                Some(Interest::Read) if entry.revents & READ_READY != 0 => {
                    request.wanted = None;
                    request.read_event(caller)
                }
                Some(Interest::Write) if entry.revents & WRITE_READY != 0 => {
                    request.wanted = None;
                    request.write_event(caller)
                }
                _ => continue,
            };

            self.interpret(handle, progress);
        }
    }

    pub(crate) fn condition_met(&self, id: CallerId, condition: &WaitCondition) -> bool {
        self.caller(id)
            .map_or(true, |caller| condition.satisfied(caller, &self.requests))
    }
}

impl Engine {
    /// Runs the engine for `id` until `condition` holds, the caller's
    /// budget runs out, or nothing visible is left to do.
    ///
    /// A failure of the multiplexing call itself fails every pending
    /// request of every caller and is returned as the error.
    pub(crate) fn progress_requests(
        &self,
        id: CallerId,
        condition: &mut WaitCondition,
    ) -> Result<Outcome, Fault> {
        let mut core = self.lock();
        {
            let caller = core.caller_mut(id)?;
            if !caller.clock.is_running() {
                let timeout = caller.timeout;
                caller.clock.start(Instant::now(), timeout);
            }
        }

        loop {
            let proxy = core.proxy.clone();
            let proxied = proxy.is_some();
            if core.visible_pending(id, proxied) == 0 {
                break;
            }

            let now = Instant::now();
            let budget = core.caller_mut(id)?.clock.remaining(now);

            let submitted = core.construct_poll_list(id, proxied)?;
            if core.condition_met(id, condition) {
                return Ok(Outcome::Satisfied);
            }
            if submitted == 0 {
                continue;
            }

            if budget.is_zero() {
                core.fail_owner(Some(id), &timeout_fault());
                return Ok(Outcome::TimedOut);
            }

            let (budget, adjusted) = condition.time_budget(now, budget);
            let timeout_ms = poll_timeout_ms(budget);
            let mut fds = std::mem::take(&mut core.caller_mut(id)?.poll_array);

            trace!(
                condition = condition.name(),
                needs_requests = condition.needs_requests(),
                submitted,
                timeout_ms,
                proxied,
                "polling"
            );

            let result = match &proxy {
                Some(proxy) => {
                    drop(core);
                    let result = proxy.poll(&mut fds, timeout_ms);
                    core = self.lock();
                    result
                }
                None => SystemPoller.poll(&mut fds, timeout_ms),
            };

            match result {
                Ok(0) => {
                    core.caller_mut(id)?.poll_array = fds;
                    if adjusted {
                        return Ok(Outcome::Blocked);
                    }

                    core.fail_owner(Some(id), &timeout_fault());
                    return Ok(Outcome::TimedOut);
                }
                Ok(_) => {
                    core.dispatch_ready(id, &fds, proxied);
                    core.caller_mut(id)?.poll_array = fds;
                    if core.condition_met(id, condition) {
                        return Ok(Outcome::Satisfied);
                    }
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    core.caller_mut(id)?.poll_array = fds;
                }
                Err(err) => {
                    core.caller_mut(id)?.poll_array = fds;
                    let fault = Fault::from_io(FaultCode::SeriousInternalOsError, "poll", &err);
                    warn!(%fault, "poll failed, failing every pending request");
                    core.fail_owner(None, &fault);
                    return Err(fault);
                }
            }
        }

        Ok(Outcome::Drained)
    }
}

fn timeout_fault() -> Fault {
    Fault::new(FaultCode::ServiceTimeout, "service did not respond in time")
}
