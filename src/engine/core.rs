//! The engine handle and the state it guards.
//!
//! [`Engine`] is a cheap, cloneable handle around `Arc<Mutex<EngineCore>>`.
//! Every call locks the core for its duration; the only place the lock is
//! released mid-call is around an installed poll proxy, so the proxy may
//! let other tasks use the engine for their own callers.
//!
//! # Example
//!
//! ```ignore
//! use sockrpc::{DirectoryLocator, Engine};
//! use std::time::Duration;
//!
//! let engine = Engine::builder()
//!     .locator(DirectoryLocator::new("/tmp/services"))
//!     .build();
//! let caller = engine.new_caller("client");
//!
//! let request = engine.create_request();
//! engine.with_request(request, |r| r.set_payload("hello"))?;
//! engine.add_request(caller, "system.echo.0.raw", request)?;
//! engine.execute_and_wait_all(caller)?;
//!
//! let answer = engine.inspect_request(request, |r| r.response_data().to_vec())?;
//! ```

use crate::builder::EngineBuilder;
use crate::engine::caller::{CallerContext, CallerId};
use crate::engine::condition::WaitCondition;
use crate::engine::dispatch::Outcome;
use crate::engine::queue::RequestQueue;
use crate::error::{Fault, FaultCode};
use crate::locator::Locator;
use crate::reactor::poller::Poller;
use crate::request::{Attributes, Location, Request, RequestHandle, RequestState};
use crate::service_key::ServiceKey;
use crate::utils::slab::Slab;
use crate::wire::netstring::MAX_FIELD_LENGTH;
use crate::wire::{RequestHeader, assemble_request};

use bytes::Bytes;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of attempts a request gets before its failure is surfaced.
pub const MAXIMUM_TRY_COUNT: u32 = 2;

const FIRST_REQUEST_ID: u32 = 100;
const LAST_REQUEST_ID: u32 = 10_000_000;

pub(crate) struct EngineCore {
    pub(crate) requests: Slab<Request>,
    pub(crate) callers: Slab<CallerContext>,
    pub(crate) pending: RequestQueue,
    next_request_id: u32,

    pub(crate) locator: Option<Arc<dyn Locator>>,
    pub(crate) proxy: Option<Arc<dyn Poller>>,
    pub(crate) debug: bool,
    pub(crate) default_timeout: Duration,
}

impl EngineCore {
    pub(crate) fn new(
        locator: Option<Arc<dyn Locator>>,
        proxy: Option<Arc<dyn Poller>>,
        debug: bool,
        default_timeout: Duration,
    ) -> Self {
        Self {
            requests: Slab::new(),
            callers: Slab::new(),
            pending: RequestQueue::new(),
            next_request_id: FIRST_REQUEST_ID,
            locator,
            proxy,
            debug,
            default_timeout,
        }
    }

    fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        if self.next_request_id > LAST_REQUEST_ID {
            self.next_request_id = FIRST_REQUEST_ID;
        }

        id
    }

    pub(crate) fn caller(&self, id: CallerId) -> Result<&CallerContext, Fault> {
        self.callers
            .get(id.0)
            .ok_or_else(|| Fault::from(FaultCode::UnknownCaller))
    }

    pub(crate) fn caller_mut(&mut self, id: CallerId) -> Result<&mut CallerContext, Fault> {
        self.callers
            .get_mut(id.0)
            .ok_or_else(|| Fault::from(FaultCode::UnknownCaller))
    }

    /// Like [`caller_mut`](Self::caller_mut), but rejects a caller that is
    /// already inside another engine call.
    pub(crate) fn idle_caller_mut(&mut self, id: CallerId) -> Result<&mut CallerContext, Fault> {
        let caller = self.caller_mut(id)?;
        if caller.busy {
            return Err(Fault::new(
                FaultCode::CallerBusy,
                format!("caller {} re-entered the engine", caller.identity),
            ));
        }

        Ok(caller)
    }

    pub(crate) fn request(&self, handle: RequestHandle) -> Result<&Request, Fault> {
        self.requests
            .get(handle.0)
            .ok_or_else(|| Fault::from(FaultCode::UnknownRequest))
    }

    pub(crate) fn request_mut(&mut self, handle: RequestHandle) -> Result<&mut Request, Fault> {
        self.requests
            .get_mut(handle.0)
            .ok_or_else(|| Fault::from(FaultCode::UnknownRequest))
    }

    /// The request together with its owning caller.
    pub(crate) fn parts(
        &mut self,
        handle: RequestHandle,
    ) -> Option<(&mut Request, &mut CallerContext)> {
        let request = self.requests.get_mut(handle.0)?;
        let caller = self.callers.get_mut(request.owner?.0)?;
        Some((request, caller))
    }

    fn add_request(
        &mut self,
        id: CallerId,
        key: &str,
        handle: RequestHandle,
        raw: Option<Bytes>,
    ) -> Result<(), Fault> {
        self.idle_caller_mut(id)?;
        let request = self.request_mut(handle)?;
        if request.location != Location::WithCaller {
            return Err(Fault::new(
                FaultCode::RequestAlreadyAdded,
                format!("request {} is already in the engine", request.request_id),
            ));
        }

        let (service_key, path) = match self.validate(handle, key, raw.as_ref()) {
            Ok(resolved) => resolved,
            Err(fault) => {
                self.request_mut(handle)?.fault = Some(fault.clone());
                return Err(fault);
            }
        };

        let request_id = match raw {
            Some(_) => 0,
            None => self.next_request_id(),
        };
        let debug = self.debug;

        let Some((request, caller)) = self.requests.get_mut(handle.0).zip(self.callers.get_mut(id.0))
        else {
            return Err(Fault::from(FaultCode::UnknownRequest));
        };

        request.try_count = 0;
        request.owner = Some(id);
        request.client_id = caller.identity.clone();
        request.timeout = caller.timeout;
        request.debug = debug;
        request.service_key = service_key;
        if path.is_some() {
            request.rendezvous = path;
        }
        caller.add_outstanding();

        let segments = match raw {
            Some(frame) => {
                request.bypass_id_check = true;
                [frame, Bytes::new(), Bytes::new()]
            }
            None => {
                request.bypass_id_check = false;
                request.request_id = request_id;
                assemble_request(
                    &RequestHeader {
                        request_id,
                        client_id: &request.client_id,
                        service_key: &request.service_key,
                        timeout_ms: request.timeout.as_millis() as u64,
                        attributes: request.attributes(),
                        context: request.context(),
                    },
                    request.payload().clone(),
                )
            }
        };
        request.outbound.set(segments);

        let bypass_open = request.has(Attributes::NEED_AFFINITY);
        request.prepare(caller, bypass_open);
        request.clock.stop();
        request.location = Location::Pending;
        self.pending.push(handle);

        if let Some(request) = self.requests.get(handle.0) {
            debug!(
                request_id = request.request_id,
                service = %request.service_key,
                state = ?request.state,
                "request added"
            );
        }

        Ok(())
    }

    /// Checks the request can be added and resolves where it goes.
    ///
    /// Returns the canonical service key and, unless an affinity connection
    /// will be reused, the rendezvous path.
    fn validate(
        &self,
        handle: RequestHandle,
        key: &str,
        raw: Option<&Bytes>,
    ) -> Result<(String, Option<PathBuf>), Fault> {
        let locator = self
            .locator
            .as_ref()
            .ok_or_else(|| Fault::new(FaultCode::NotInitialized, "no locator configured"))?;
        let request = self.request(handle)?;

        let length = raw.map_or(request.payload().len(), Bytes::len);
        if length > MAX_FIELD_LENGTH || (raw.is_some() && length == 0) {
            return Err(Fault::new(
                FaultCode::BadRequestLength,
                format!("request length {length} is not sendable"),
            ));
        }

        let attributes = request.attributes();
        if attributes.contains(Attributes::KEEP_AFFINITY) {
            if attributes.contains(Attributes::NO_WAIT) {
                return Err(FaultCode::NoWaitNotAllowed.into());
            }
            if !attributes.contains(Attributes::NO_RETRY) {
                return Err(FaultCode::NeedNoRetry.into());
            }
        }

        let need_affinity = attributes.contains(Attributes::NEED_AFFINITY);
        if need_affinity && !request.has_affinity() {
            return Err(Fault::new(
                FaultCode::NoAffinity,
                "needAffinity set but no affinity connection is open",
            ));
        }

        let key = ServiceKey::parse(key)?;
        if need_affinity || request.has_affinity() {
            return Ok((key.english_key(), None));
        }

        let path = locator.resolve(&key)?;
        Ok((key.english_key(), Some(path)))
    }

    /// Takes a request out of whatever queue holds it and gives it back to
    /// the caller.
    pub(crate) fn hand_back(&mut self, handle: RequestHandle) {
        let location = match self.requests.get(handle.0) {
            Some(request) => request.location,
            None => return,
        };

        if let Some((request, caller)) = self.parts(handle) {
            match location {
                Location::Completed => {
                    caller.completed.remove(handle);
                }
                Location::AwaitingEvent => caller.fd_index.retain(|_, h| *h != handle),
                Location::Pending | Location::WithCaller => {}
            }
            request.set_state(caller, RequestState::WithCaller);
        }

        self.pending.remove(handle);
        if let Some(request) = self.requests.get_mut(handle.0) {
            request.state = RequestState::WithCaller;
            request.location = Location::WithCaller;
            request.owner = None;
            request.wanted = None;
            request.poll_index = None;
        }
    }

    /// Fails a request that is still in flight and returns it to the caller.
    /// A request that already completed keeps its own result.
    pub(crate) fn cancel(&mut self, handle: RequestHandle, fault: &Fault) {
        let location = match self.requests.get(handle.0) {
            Some(request) => request.location,
            None => return,
        };

        if matches!(location, Location::Pending | Location::AwaitingEvent) {
            self.pending.remove(handle);
            if let Some(request) = self.requests.get_mut(handle.0) {
                request.fault = Some(fault.clone());
            }
            self.terminate(handle, false);
        }

        self.hand_back(handle);
    }

    /// Returns every completed request of `id` to the caller.
    pub(crate) fn hand_back_completed(&mut self, id: CallerId) {
        let completed: Vec<RequestHandle> = match self.callers.get_mut(id.0) {
            Some(caller) => caller.completed.drain(),
            None => return,
        };

        for handle in completed {
            self.hand_back(handle);
        }
    }

    fn delete_caller(&mut self, id: CallerId, fault: &Fault) -> Result<(), Fault> {
        let caller = self.idle_caller_mut(id)?;
        let awaiting: Vec<RequestHandle> = caller.fd_index.values().copied().collect();
        debug!(caller = %caller.identity, "deleting caller");

        self.fail_owner(Some(id), fault);
        for handle in awaiting {
            self.cancel(handle, fault);
        }
        self.hand_back_completed(id);

        let orphans: Vec<RequestHandle> = self
            .requests
            .iter()
            .filter(|(_, request)| request.owner == Some(id))
            .map(|(key, _)| RequestHandle(key))
            .collect();
        for handle in orphans {
            self.cancel(handle, fault);
        }

        self.callers.remove(id.0);
        Ok(())
    }
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                pending = self.pending.len(),
                requests = self.requests.len(),
                "engine dropped with requests in flight"
            );
        }
    }
}

/// Handle to a request engine. Clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    core: Arc<Mutex<EngineCore>>,
}

impl Engine {
    /// Starts configuring an engine.
    ///
    /// # Example
    /// ```ignore
    /// let engine = Engine::builder()
    ///     .locator(DirectoryLocator::new("/var/run/services"))
    ///     .default_timeout(Duration::from_secs(2))
    ///     .build();
    /// ```
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn from_core(core: EngineCore) -> Self {
        Self {
            core: Arc::new(Mutex::new(core)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with `id` marked busy, recording any fault on the caller.
    pub(crate) fn guarded<R>(
        &self,
        id: CallerId,
        f: impl FnOnce() -> Result<R, Fault>,
    ) -> Result<R, Fault> {
        {
            let mut core = self.lock();
            let caller = core.idle_caller_mut(id)?;
            caller.busy = true;
            caller.fault = None;
        }

        let result = f();

        let mut core = self.lock();
        if let Ok(caller) = core.caller_mut(id) {
            caller.busy = false;
            if let Err(fault) = &result {
                caller.fault = Some(fault.clone());
            }
        }

        result
    }

    /// Registers a caller using the engine's default timeout.
    pub fn new_caller(&self, name: &str) -> CallerId {
        let mut core = self.lock();
        let timeout = core.default_timeout;
        CallerId(core.callers.insert(CallerContext::new(name, timeout)))
    }

    /// Sets the time budget given to each batch of this caller's requests.
    pub fn set_caller_timeout(&self, id: CallerId, timeout: Duration) -> Result<(), Fault> {
        self.lock().idle_caller_mut(id)?.timeout = timeout;
        Ok(())
    }

    /// Unregisters a caller, failing every request it still has in flight
    /// with `fault` and handing all of its requests back.
    pub fn delete_caller(&self, id: CallerId, fault: impl Into<Fault>) -> Result<(), Fault> {
        self.lock().delete_caller(id, &fault.into())
    }

    /// The `name:pid` identity the caller's requests are sent under.
    pub fn caller_identity(&self, id: CallerId) -> Result<String, Fault> {
        Ok(self.lock().caller(id)?.identity.clone())
    }

    /// The fault returned by this caller's most recent failing wait call.
    pub fn caller_fault(&self, id: CallerId) -> Result<Option<Fault>, Fault> {
        Ok(self.lock().caller(id)?.fault.clone())
    }

    /// Requests added by this caller and not yet done.
    pub fn outstanding_count(&self, id: CallerId) -> Result<usize, Fault> {
        Ok(self.lock().caller(id)?.outstanding)
    }

    /// Outstanding requests that are fully sent and awaiting a response.
    pub fn reading_count(&self, id: CallerId) -> Result<usize, Fault> {
        Ok(self.lock().caller(id)?.reading)
    }

    pub fn create_request(&self) -> RequestHandle {
        RequestHandle(self.lock().requests.insert(Request::new()))
    }

    /// Forces the request out of the engine if needed and frees it.
    pub fn release_request(&self, handle: RequestHandle) -> Result<(), Fault> {
        let mut core = self.lock();
        core.request(handle)?;
        core.cancel(
            handle,
            &Fault::new(FaultCode::RequestNotAdded, "request released"),
        );
        core.requests.remove(handle.0);
        Ok(())
    }

    /// Gives mutable access to a request that is with the caller.
    pub fn with_request<R>(
        &self,
        handle: RequestHandle,
        f: impl FnOnce(&mut Request) -> R,
    ) -> Result<R, Fault> {
        let mut core = self.lock();
        let request = core.request_mut(handle)?;
        if request.location != Location::WithCaller {
            return Err(Fault::new(
                FaultCode::RequestInProgress,
                "request is owned by the engine",
            ));
        }

        Ok(f(request))
    }

    /// Gives read access to a request wherever it is.
    pub fn inspect_request<R>(
        &self,
        handle: RequestHandle,
        f: impl FnOnce(&Request) -> R,
    ) -> Result<R, Fault> {
        let core = self.lock();
        Ok(f(core.request(handle)?))
    }

    /// Which collection currently holds the request.
    pub fn location(&self, handle: RequestHandle) -> Option<Location> {
        self.lock()
            .requests
            .get(handle.0)
            .map(|request| request.location)
    }

    /// Returns the request to a clean "with caller" state.
    ///
    /// Its payload, context and attributes are kept; the response, fault,
    /// try count and any affinity connection are dropped.
    pub fn reset_request(&self, handle: RequestHandle) -> Result<(), Fault> {
        let mut core = self.lock();
        core.request(handle)?;
        core.cancel(
            handle,
            &Fault::new(FaultCode::RequestNotAdded, "request reset"),
        );

        let request = core.request_mut(handle)?;
        request.close_socket();
        request.reset_response();
        request.outbound.clear();
        request.try_count = 0;
        request.rendezvous = None;
        Ok(())
    }

    /// Cancels a request mid-flight, failing it with `fault`.
    pub fn remove_request(&self, handle: RequestHandle, fault: impl Into<Fault>) -> Result<(), Fault> {
        let mut core = self.lock();
        if core.request(handle)?.location == Location::WithCaller {
            return Err(FaultCode::RequestNotAdded.into());
        }

        core.cancel(handle, &fault.into());
        Ok(())
    }

    /// Resolves `service_key` and queues the request on behalf of `caller`.
    pub fn add_request(
        &self,
        caller: CallerId,
        service_key: &str,
        handle: RequestHandle,
    ) -> Result<(), Fault> {
        self.lock().add_request(caller, service_key, handle, None)
    }

    /// Queues a caller-built frame, sent verbatim instead of the request's
    /// own payload. The response is not matched against a request id.
    pub fn add_raw_request(
        &self,
        caller: CallerId,
        service_key: &str,
        handle: RequestHandle,
        frame: impl Into<Bytes>,
    ) -> Result<(), Fault> {
        self.lock()
            .add_request(caller, service_key, handle, Some(frame.into()))
    }

    /// Runs until every outstanding request of `caller` is done and hands
    /// them all back. Returns how many were handed back, or 0 on timeout.
    pub fn execute_and_wait_all(&self, caller: CallerId) -> Result<usize, Fault> {
        self.guarded(caller, || {
            let outstanding = self.lock().caller(caller)?.outstanding;
            let result = if outstanding == 0 {
                Ok(Outcome::Satisfied)
            } else {
                self.progress_requests(caller, &mut WaitCondition::All)
            };

            let mut core = self.lock();
            let count = core.caller(caller)?.completed.len();
            core.hand_back_completed(caller);

            match result? {
                Outcome::Satisfied => Ok(count),
                _ => Ok(0),
            }
        })
    }

    /// Runs until every outstanding request of `caller` has been fully
    /// written. Returns the number of requests awaiting a response, and at
    /// least 1 when the condition was met, even if every request already
    /// finished. 0 means the wait timed out or nothing was outstanding.
    pub fn execute_and_wait_sent(&self, caller: CallerId) -> Result<usize, Fault> {
        self.guarded(caller, || {
            if self.lock().caller(caller)?.outstanding == 0 {
                return Ok(0);
            }

            match self.progress_requests(caller, &mut WaitCondition::Sent)? {
                Outcome::Satisfied => Ok(self.lock().caller(caller)?.reading.max(1)),
                _ => Ok(0),
            }
        })
    }

    /// Runs until any request of `caller` is done and hands it back.
    pub fn execute_and_wait_any(&self, caller: CallerId) -> Result<Option<RequestHandle>, Fault> {
        self.guarded(caller, || {
            let (completed, outstanding) = {
                let core = self.lock();
                let context = core.caller(caller)?;
                (context.completed.len(), context.outstanding)
            };

            let result = if completed == 0 && outstanding > 0 {
                self.progress_requests(caller, &mut WaitCondition::Any)
            } else {
                Ok(Outcome::Satisfied)
            };

            let mut core = self.lock();
            let first = core.caller_mut(caller)?.completed.pop();
            match first {
                Some(handle) => {
                    core.hand_back(handle);
                    Ok(Some(handle))
                }
                None => result.map(|_| None),
            }
        })
    }

    /// Runs until `handle` is done and hands it back.
    ///
    /// Returns 1 once the request completed, 0 if the caller's budget ran
    /// out first (the request is then handed back with a timeout fault).
    pub fn execute_and_wait_one(&self, caller: CallerId, handle: RequestHandle) -> Result<usize, Fault> {
        self.guarded(caller, || {
            let state = {
                let core = self.lock();
                let request = core.request(handle)?;
                if request.owner != Some(caller) || request.location == Location::WithCaller {
                    return Err(Fault::new(
                        FaultCode::RequestNotAdded,
                        "request was not added by this caller",
                    ));
                }
                request.state
            };

            let result = if state == RequestState::Done {
                Ok(Outcome::Satisfied)
            } else {
                self.progress_requests(caller, &mut WaitCondition::One(handle))
            };

            let mut core = self.lock();
            let done = core
                .request(handle)
                .is_ok_and(|request| request.state == RequestState::Done);
            if done {
                core.hand_back(handle);
            }

            match result? {
                Outcome::Satisfied if done => Ok(1),
                _ => Ok(0),
            }
        })
    }

    /// Runs for at most `budget`, returning as soon as any request of
    /// `caller` completes. Completed requests stay queued for
    /// [`execute_and_wait_any`](Self::execute_and_wait_any) or
    /// [`completed_request`](Self::completed_request); the return value is
    /// how many are waiting.
    pub fn execute_and_wait_blocked(&self, caller: CallerId, budget: Duration) -> Result<usize, Fault> {
        self.guarded(caller, || {
            let mut condition = WaitCondition::blocked(Instant::now(), budget);
            let completed = self.lock().caller(caller)?.completed.len();

            let outcome = if completed > 0 {
                Outcome::Satisfied
            } else {
                self.progress_requests(caller, &mut condition)?
            };

            match outcome {
                Outcome::TimedOut => Ok(0),
                _ => Ok(self.lock().caller(caller)?.completed.len()),
            }
        })
    }

    /// Installs `proxy` in place of `poll(2)`; `None` restores the system
    /// call. Returns the proxy previously installed.
    pub fn set_poll_proxy(&self, proxy: Option<Arc<dyn Poller>>) -> Option<Arc<dyn Poller>> {
        std::mem::replace(&mut self.lock().proxy, proxy)
    }

    pub fn poll_proxy(&self) -> Option<Arc<dyn Poller>> {
        self.lock().proxy.clone()
    }

    /// Enables trace-level dumps of request I/O for requests added from now on.
    pub fn set_debug(&self, debug: bool) {
        self.lock().debug = debug;
    }
}
