//! Fault types reported by the engine.
//!
//! Every request carries a fault slot, and every fallible engine call returns
//! `Result<_, Fault>`. A [`Fault`] pairs a [`FaultCode`] with free-form text
//! describing the specific occurrence (an errno string, a socket path, ...).
//!
//! Codes map onto stable signed integers so they can travel over the wire:
//! negative values belong to the engine, anything else is a service-defined
//! fault passed through verbatim as [`FaultCode::Service`].

use thiserror::Error;

/// Broad classification of a fault, used to decide retry and escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The caller used the API incorrectly.
    Configuration,
    /// The service key was malformed or could not be located.
    Resolution,
    /// The socket could not be created or connected.
    Connection,
    /// A read or write on an established connection failed.
    Io,
    /// The response was malformed or misrouted.
    Protocol,
    /// A deadline expired.
    Timeout,
    /// The engine itself, or the multiplexing primitive, misbehaved.
    Systemic,
    /// The service answered with its own fault.
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FaultCode {
    #[error("engine not initialized")]
    NotInitialized,
    #[error("request has not been added")]
    RequestNotAdded,
    #[error("request has already been added")]
    RequestAlreadyAdded,
    #[error("request in progress")]
    RequestInProgress,
    #[error("bad request length")]
    BadRequestLength,
    #[error("no affinity socket available")]
    NoAffinity,
    #[error("noWait is not allowed with keepAffinity")]
    NoWaitNotAllowed,
    #[error("keepAffinity requires noRetry")]
    NeedNoRetry,
    #[error("caller is busy in another engine call")]
    CallerBusy,
    #[error("unknown caller")]
    UnknownCaller,
    #[error("unknown request")]
    UnknownRequest,

    #[error("socket open failed")]
    OpenSocketFailed,
    #[error("socket connect failed")]
    ConnectFailed,
    #[error("socket write failed")]
    SocketWriteFailed,
    #[error("socket read failed")]
    SocketReadFailed,
    #[error("service timeout")]
    ServiceTimeout,
    #[error("incomplete response")]
    IncompleteResponse,
    #[error("response packet format error")]
    ResponsePacketFormatError,
    #[error("context format error")]
    ContextFormatError,
    #[error("context key uses reserved namespace")]
    ContextReservedNamespace,

    #[error("service not found")]
    ServiceNotFound,
    #[error("service key is malformed")]
    ServiceKeyBad,

    #[error("write event for wrong file descriptor")]
    WriteEventForWrongFd,
    #[error("read event for wrong file descriptor")]
    ReadEventForWrongFd,
    #[error("write event in wrong state")]
    WriteEventWrongState,
    #[error("read event in wrong state")]
    ReadEventWrongState,

    #[error("serious internal OS error")]
    SeriousInternalOsError,
    #[error("serious internal routing error")]
    SeriousInternalRoutingError,

    #[error("service fault {0}")]
    Service(i32),
}

impl FaultCode {
    /// Returns the stable integer form of this code.
    pub fn code(self) -> i32 {
        match self {
            FaultCode::NotInitialized => -2,
            FaultCode::RequestNotAdded => -3,
            FaultCode::RequestAlreadyAdded => -4,
            FaultCode::RequestInProgress => -5,
            FaultCode::BadRequestLength => -8,
            FaultCode::NoAffinity => -9,
            FaultCode::NoWaitNotAllowed => -10,
            FaultCode::NeedNoRetry => -11,
            FaultCode::CallerBusy => -12,
            FaultCode::UnknownCaller => -13,
            FaultCode::UnknownRequest => -14,
            FaultCode::OpenSocketFailed => -15,
            FaultCode::ConnectFailed => -16,
            FaultCode::SocketWriteFailed => -17,
            FaultCode::SocketReadFailed => -18,
            FaultCode::ServiceTimeout => -19,
            FaultCode::IncompleteResponse => -20,
            FaultCode::ResponsePacketFormatError => -21,
            FaultCode::ContextFormatError => -22,
            FaultCode::ContextReservedNamespace => -23,
            FaultCode::ServiceNotFound => -30,
            FaultCode::ServiceKeyBad => -31,
            FaultCode::WriteEventForWrongFd => -46,
            FaultCode::ReadEventForWrongFd => -47,
            FaultCode::WriteEventWrongState => -48,
            FaultCode::ReadEventWrongState => -49,
            FaultCode::SeriousInternalOsError => -998,
            FaultCode::SeriousInternalRoutingError => -999,
            FaultCode::Service(code) => code,
        }
    }

    /// Maps an integer received from the wire back onto a code.
    ///
    /// Integers the engine does not own become [`FaultCode::Service`].
    pub fn from_code(code: i32) -> FaultCode {
        const KNOWN: [FaultCode; 28] = [
            FaultCode::NotInitialized,
            FaultCode::RequestNotAdded,
            FaultCode::RequestAlreadyAdded,
            FaultCode::RequestInProgress,
            FaultCode::BadRequestLength,
            FaultCode::NoAffinity,
            FaultCode::NoWaitNotAllowed,
            FaultCode::NeedNoRetry,
            FaultCode::CallerBusy,
            FaultCode::UnknownCaller,
            FaultCode::UnknownRequest,
            FaultCode::OpenSocketFailed,
            FaultCode::ConnectFailed,
            FaultCode::SocketWriteFailed,
            FaultCode::SocketReadFailed,
            FaultCode::ServiceTimeout,
            FaultCode::IncompleteResponse,
            FaultCode::ResponsePacketFormatError,
            FaultCode::ContextFormatError,
            FaultCode::ContextReservedNamespace,
            FaultCode::ServiceNotFound,
            FaultCode::ServiceKeyBad,
            FaultCode::WriteEventForWrongFd,
            FaultCode::ReadEventForWrongFd,
            FaultCode::WriteEventWrongState,
            FaultCode::ReadEventWrongState,
            FaultCode::SeriousInternalOsError,
            FaultCode::SeriousInternalRoutingError,
        ];

        KNOWN
            .into_iter()
            .find(|known| known.code() == code)
            .unwrap_or(FaultCode::Service(code))
    }

    pub fn kind(self) -> FaultKind {
        match self {
            FaultCode::NotInitialized
            | FaultCode::RequestNotAdded
            | FaultCode::RequestAlreadyAdded
            | FaultCode::RequestInProgress
            | FaultCode::BadRequestLength
            | FaultCode::NoAffinity
            | FaultCode::NoWaitNotAllowed
            | FaultCode::NeedNoRetry
            | FaultCode::CallerBusy
            | FaultCode::UnknownCaller
            | FaultCode::UnknownRequest
            | FaultCode::ContextFormatError
            | FaultCode::ContextReservedNamespace
            | FaultCode::WriteEventForWrongFd
            | FaultCode::ReadEventForWrongFd
            | FaultCode::WriteEventWrongState
            | FaultCode::ReadEventWrongState => FaultKind::Configuration,
            FaultCode::ServiceNotFound | FaultCode::ServiceKeyBad => FaultKind::Resolution,
            FaultCode::OpenSocketFailed | FaultCode::ConnectFailed => FaultKind::Connection,
            FaultCode::SocketWriteFailed | FaultCode::SocketReadFailed => FaultKind::Io,
            FaultCode::IncompleteResponse | FaultCode::ResponsePacketFormatError => {
                FaultKind::Protocol
            }
            FaultCode::ServiceTimeout => FaultKind::Timeout,
            FaultCode::SeriousInternalOsError | FaultCode::SeriousInternalRoutingError => {
                FaultKind::Systemic
            }
            FaultCode::Service(_) => FaultKind::Service,
        }
    }

    /// Whether a request failing with this code may be attempted again.
    ///
    /// A routing error means the connection delivered somebody else's
    /// response, so a fresh connection is worth trying.
    pub fn is_retryable(self) -> bool {
        matches!(self.kind(), FaultKind::Io | FaultKind::Protocol)
            || self == FaultCode::SeriousInternalRoutingError
    }
}

/// A fault code together with the text describing this occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} ({}): {text}", .code.code())]
pub struct Fault {
    code: FaultCode,
    text: String,
}

impl Fault {
    pub fn new(code: FaultCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Builds a fault whose text is the last OS error, prefixed by `context`.
    pub(crate) fn from_io(code: FaultCode, context: &str, err: &std::io::Error) -> Self {
        Self::new(code, format!("{context}: {err}"))
    }

    pub fn code(&self) -> FaultCode {
        self.code
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> FaultKind {
        self.code.kind()
    }
}

impl From<FaultCode> for Fault {
    fn from(code: FaultCode) -> Self {
        Self::new(code, code.to_string())
    }
}
