//! A single request/response exchange.
//!
//! A [`Request`] is created through [`Engine::create_request`] and lives in
//! the engine's arena; callers refer to it by [`RequestHandle`]. While the
//! request is with the caller its payload, context and attributes may be
//! changed; once added, the engine drives it through [`RequestState`] until
//! it is done and handed back by one of the wait calls.
//!
//! [`Engine::create_request`]: crate::Engine::create_request

mod attributes;
pub(crate) mod buffers;
mod progress;
mod state;

pub use attributes::Attributes;
pub(crate) use state::Progress;
pub use state::{Interest, Location, RequestState};

use crate::engine::caller::{CallerContext, CallerId};
use crate::error::{Fault, FaultCode};
use crate::time::TimeoutClock;
use crate::utils::slab::SlabKey;
use crate::wire::Context;
use buffers::{Inbound, Outbound};

use bytes::Bytes;
use std::ops::Range;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::time::Duration;

/// Stable reference to a request owned by an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub(crate) SlabKey);

pub struct Request {
    payload: Bytes,
    context: Context,
    attributes: Attributes,
    tag: u64,

    pub(crate) state: RequestState,
    pub(crate) location: Location,
    pub(crate) owner: Option<CallerId>,

    /// Identity of the owning caller, checked against the response.
    pub(crate) client_id: String,
    pub(crate) request_id: u32,
    /// Raw requests carry caller-built frames whose id is unknown.
    pub(crate) bypass_id_check: bool,
    pub(crate) service_key: String,
    pub(crate) rendezvous: Option<PathBuf>,

    pub(crate) socket: Option<OwnedFd>,
    pub(crate) outbound: Outbound,
    pub(crate) inbound: Inbound,

    pub(crate) fault: Option<Fault>,
    response_data: Range<usize>,
    service_id: String,

    pub(crate) try_count: u32,
    pub(crate) affinity: bool,
    pub(crate) timeout: Duration,
    pub(crate) clock: TimeoutClock,

    /// The single readiness this request is blocked on, if any.
    pub(crate) wanted: Option<Interest>,
    /// Slot in the owner's poll array for the current cycle.
    pub(crate) poll_index: Option<usize>,
    /// Dump I/O details at trace level.
    pub(crate) debug: bool,
}

impl Request {
    pub(crate) fn new() -> Self {
        Self {
            payload: Bytes::new(),
            context: Context::new(),
            attributes: Attributes::empty(),
            tag: 0,
            state: RequestState::WithCaller,
            location: Location::WithCaller,
            owner: None,
            client_id: String::new(),
            request_id: 0,
            bypass_id_check: false,
            service_key: String::new(),
            rendezvous: None,
            socket: None,
            outbound: Outbound::default(),
            inbound: Inbound::default(),
            fault: None,
            response_data: 0..0,
            service_id: String::new(),
            try_count: 0,
            affinity: false,
            timeout: Duration::ZERO,
            clock: TimeoutClock::new(),
            wanted: None,
            poll_index: None,
            debug: false,
        }
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Adds a context entry sent to the service with the request.
    pub fn set_context(&mut self, key: &str, value: &str) -> Result<(), Fault> {
        self.context.insert(key, value)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn clear_context(&mut self) {
        self.context.clear();
    }

    pub fn set_attribute(&mut self, attributes: Attributes) {
        self.attributes.insert(attributes);
    }

    pub fn clear_attribute(&mut self, attributes: Attributes) {
        self.attributes.remove(attributes);
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    /// Stores an opaque caller value, handy for matching `execute_and_wait_any` results.
    pub fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// True from the moment the request is added until the caller gets it back.
    pub fn in_progress(&self) -> bool {
        self.state != RequestState::WithCaller
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    pub fn response_data(&self) -> &[u8] {
        self.inbound.data(self.response_data.clone())
    }

    /// Identity reported by the service that answered.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn try_count(&self) -> u32 {
        self.try_count
    }

    /// True while a connection kept by `KEEP_AFFINITY` is held open.
    pub fn has_affinity(&self) -> bool {
        self.affinity
    }

    pub fn socket_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub(crate) fn has(&self, attributes: Attributes) -> bool {
        self.attributes.contains(attributes)
    }

    pub(crate) fn set_fault(&mut self, code: FaultCode, text: impl Into<String>) {
        self.fault = Some(Fault::new(code, text));
    }

    pub(crate) fn clear_fault(&mut self) {
        self.fault = None;
    }

    /// Moves to `state`, keeping the owner's reading count in step.
    pub(crate) fn set_state(&mut self, caller: &mut CallerContext, state: RequestState) {
        if self.state == state {
            return;
        }
        if self.state == RequestState::Reading {
            caller.left_reading();
        }
        if state == RequestState::Reading {
            caller.entered_reading();
        }

        self.state = state;
    }

    /// Forgets any previous response and fault.
    pub(crate) fn reset_response(&mut self) {
        self.inbound.reset();
        self.response_data = 0..0;
        self.service_id.clear();
        self.fault = None;
    }

    pub(crate) fn set_response(&mut self, data: Range<usize>, service_id: String) {
        self.response_data = data;
        self.service_id = service_id;
    }

    /// Rewinds the exchange so it can be attempted from the start.
    pub(crate) fn prepare(&mut self, caller: &mut CallerContext, bypass_open: bool) {
        self.outbound.rewind();
        self.reset_response();
        self.wanted = None;
        self.poll_index = None;

        let state = if bypass_open || self.affinity {
            RequestState::BypassAffinityOpen
        } else {
            RequestState::OpenConnection
        };
        self.set_state(caller, state);
    }

    pub(crate) fn close_socket(&mut self) {
        self.socket = None;
        self.affinity = false;
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}
