//! The per-request state machine.
//!
//! Each entry point advances one request as far as it can go without
//! blocking and reports a [`Progress`]. None of them poll; the engine
//! decides when to wait for readiness and which handler to call.

use super::{Attributes, Interest, Progress, Request, RequestState};
use crate::engine::caller::CallerContext;
use crate::error::{Fault, FaultCode};
use crate::reactor::io::{read_into, write_segments};
use crate::reactor::socket::{ConnectStatus, connect_socket, open_socket, raise_send_buffer};

use std::io;
use std::os::fd::AsRawFd;
use tracing::trace;

impl Request {
    /// Runs the state machine until the request needs readiness or resolves.
    pub(crate) fn progress_towards_poll(&mut self, caller: &mut CallerContext) -> Progress {
        match self.state {
            RequestState::OpenConnection | RequestState::BypassAffinityOpen => {
                self.try_count += 1;

                if self.state == RequestState::OpenConnection {
                    if let Err(fault) = self.open_connection(caller) {
                        self.fault = Some(fault);
                        return Progress::Failed;
                    }
                } else if self.socket.is_none() {
                    self.set_fault(FaultCode::NoAffinity, "affinity connection is no longer open");
                    return Progress::Failed;
                } else {
                    self.set_state(caller, RequestState::OpportunisticWrite);
                }

                self.set_fault(FaultCode::RequestInProgress, "Request incomplete");
                self.inbound.reset();

                if self.state == RequestState::Connecting {
                    return Progress::NeedPoll(Interest::Read);
                }

                self.opportunistic_write(caller)
            }

            RequestState::OpportunisticWrite => self.opportunistic_write(caller),
            RequestState::SubsequentWrites => Progress::NeedPoll(Interest::Write),
            RequestState::Connecting | RequestState::Reading => Progress::NeedPoll(Interest::Read),

            RequestState::Done | RequestState::WithCaller => {
                debug_assert!(false, "progressing a request in state {:?}", self.state);
                self.set_fault(
                    FaultCode::SeriousInternalRoutingError,
                    format!("request progressed in state {:?}", self.state),
                );
                Progress::Failed
            }
        }
    }

    /// Handles write-readiness.
    pub(crate) fn write_event(&mut self, caller: &mut CallerContext) -> Progress {
        if self.state != RequestState::SubsequentWrites {
            self.set_fault(
                FaultCode::WriteEventWrongState,
                format!("write event in state {:?}", self.state),
            );
            return Progress::Failed;
        }

        match self.drain_outbound() {
            Ok(_) => self.after_write(caller),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                Progress::NeedPoll(Interest::Write)
            }
            Err(err) => {
                self.fault = Some(Fault::from_io(FaultCode::SocketWriteFailed, "write", &err));
                Progress::RetryMaybe
            }
        }
    }

    /// Handles read-readiness, which also signals connect completion.
    pub(crate) fn read_event(&mut self, caller: &mut CallerContext) -> Progress {
        if self.state == RequestState::Connecting {
            self.set_state(caller, RequestState::OpportunisticWrite);
            return Progress::NeedPoll(Interest::Write);
        }

        if self.state != RequestState::Reading {
            self.set_fault(
                FaultCode::ReadEventWrongState,
                format!("read event in state {:?}", self.state),
            );
            return Progress::Failed;
        }

        let Some(fd) = self.socket.as_ref().map(AsRawFd::as_raw_fd) else {
            self.set_fault(FaultCode::SocketReadFailed, "socket closed while reading");
            return Progress::RetryMaybe;
        };

        let limit = self.inbound.read_limit();
        let bytes_before = self.inbound.bytes_read();
        let read = match read_into(fd, &mut self.inbound.buffer, limit) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Progress::NeedPoll(Interest::Read);
            }
            Err(err) => {
                self.fault = Some(Fault::from_io(FaultCode::SocketReadFailed, "read", &err));
                return Progress::RetryMaybe;
            }
        };

        if self.debug {
            trace!(request_id = self.request_id, read, "response bytes");
        }

        if read == 0 {
            if bytes_before == 0 && self.has(Attributes::NO_WAIT) {
                self.clear_fault();
                return Progress::Done;
            }

            self.set_fault(
                FaultCode::IncompleteResponse,
                format!("service closed connection after {bytes_before} response bytes"),
            );
            return Progress::RetryMaybe;
        }

        match self.absorb_response() {
            Ok(true) => Progress::Done,
            Ok(false) => Progress::NeedPoll(Interest::Read),
            Err(fault) => {
                self.fault = Some(fault);
                Progress::RetryMaybe
            }
        }
    }

    fn open_connection(&mut self, caller: &mut CallerContext) -> Result<(), Fault> {
        let Some(path) = self.rendezvous.clone() else {
            return Err(Fault::new(FaultCode::ServiceNotFound, "no rendezvous path"));
        };

        let socket = open_socket()
            .map_err(|err| Fault::from_io(FaultCode::OpenSocketFailed, "socket", &err))?;

        let status = connect_socket(&socket, &path).map_err(|err| {
            Fault::from_io(
                FaultCode::ConnectFailed,
                &format!("connect {}", path.display()),
                &err,
            )
        })?;

        raise_send_buffer(&socket);
        self.socket = Some(socket);

        let next = match status {
            ConnectStatus::Connected => RequestState::OpportunisticWrite,
            ConnectStatus::InProgress => RequestState::Connecting,
        };
        self.set_state(caller, next);

        Ok(())
    }

    /// Writes without waiting for poll: a socket that was just connected or
    /// reused almost always has buffer space.
    fn opportunistic_write(&mut self, caller: &mut CallerContext) -> Progress {
        match self.drain_outbound() {
            Ok(0) if self.outbound.residual() > 0 => {
                self.set_fault(FaultCode::SocketWriteFailed, "write accepted no bytes");
                Progress::RetryMaybe
            }
            Ok(_) => self.after_write(caller),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.set_state(caller, RequestState::SubsequentWrites);
                Progress::NeedPoll(Interest::Write)
            }
            Err(err) => {
                self.fault = Some(Fault::from_io(FaultCode::SocketWriteFailed, "write", &err));
                Progress::RetryMaybe
            }
        }
    }

    fn after_write(&mut self, caller: &mut CallerContext) -> Progress {
        if self.outbound.residual() == 0 {
            self.set_state(caller, RequestState::Reading);
            self.clear_fault();
            return Progress::NeedPoll(Interest::Read);
        }

        self.set_state(caller, RequestState::SubsequentWrites);
        Progress::NeedPoll(Interest::Write)
    }

    fn drain_outbound(&mut self) -> io::Result<usize> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };

        let written = write_segments(socket.as_raw_fd(), &self.outbound.unsent())?;
        self.outbound.advance(written);

        if self.debug {
            trace!(
                request_id = self.request_id,
                written,
                residual = self.outbound.residual(),
                "request bytes"
            );
        }

        Ok(written)
    }

    /// Feeds newly read bytes to the decoder. Returns true once the response
    /// is complete and addressed to this request.
    fn absorb_response(&mut self) -> Result<bool, Fault> {
        let inbound = &mut self.inbound;

        while let Some(ns) = inbound
            .parser
            .next(&inbound.buffer)
            .map_err(|err| Fault::new(FaultCode::ResponsePacketFormatError, err))?
        {
            inbound
                .decoder
                .add(&ns, &inbound.buffer)
                .map_err(|err| Fault::new(FaultCode::ResponsePacketFormatError, err))?;

            if inbound.decoder.is_complete() {
                break;
            }
        }

        if !inbound.decoder.is_complete() {
            return Ok(false);
        }

        let packet = inbound.decoder.packet().clone();
        if packet.client_id != self.client_id {
            return Err(Fault::new(
                FaultCode::SeriousInternalRoutingError,
                format!(
                    "response for client {:?} arrived at {:?}",
                    packet.client_id, self.client_id
                ),
            ));
        }
        if !self.bypass_id_check && packet.request_id != Some(self.request_id) {
            return Err(Fault::new(
                FaultCode::SeriousInternalRoutingError,
                format!(
                    "response for request {:?} arrived at request {}",
                    packet.request_id, self.request_id
                ),
            ));
        }

        self.fault = match packet.fault_code {
            0 => None,
            code => Some(Fault::new(FaultCode::from_code(code), packet.fault_text)),
        };
        self.set_response(packet.data, packet.service_id);

        Ok(true)
    }
}
