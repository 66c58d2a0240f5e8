/// Position of a request in its exchange.
///
/// ```text
/// WithCaller -> OpenConnection | BypassAffinityOpen -> Connecting
///            -> OpportunisticWrite -> [SubsequentWrites] -> Reading -> Done -> WithCaller
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Owned by the caller; the engine does not touch it.
    WithCaller,
    /// Needs a fresh connection to the rendezvous path.
    OpenConnection,
    /// Reuses the connection kept by an earlier affinity exchange.
    BypassAffinityOpen,
    /// Non-blocking connect in progress.
    Connecting,
    /// Connected; the first write is attempted without waiting for poll.
    OpportunisticWrite,
    /// Part of the request is still unsent.
    SubsequentWrites,
    /// Request fully sent, accumulating the response.
    Reading,
    /// Exchange finished, successfully or not.
    Done,
}

/// Which collection currently holds a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    WithCaller,
    Pending,
    Completed,
    /// Handed to an external event loop, waiting for a `send_*_event` call.
    AwaitingEvent,
}

/// Readiness a request is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Read,
    Write,
}

/// Result of advancing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    NeedPoll(Interest),
    Done,
    /// Failed, but another attempt may succeed.
    RetryMaybe,
    Failed,
}
