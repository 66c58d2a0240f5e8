//! Client engine for request/response exchanges with local services over
//! Unix-domain sockets.
//!
//! Many requests are multiplexed over non-blocking sockets and driven by a
//! single `poll(2)` call, or by a caller-supplied [`Poller`] so the engine
//! can live inside a cooperative scheduler.
//!
//! # Architecture
//!
//! - **Engine**: shared handle; resolves, queues and drives requests
//! - **EngineBuilder**: fluent configuration of locator, poll proxy, debug
//!   flag and default timeout
//! - **Request**: one exchange and its state machine
//! - **CallerContext**: per-caller completed queue, counters and deadline
//! - **Locator**: maps service keys to socket paths
//! - **wire**: typed netstring codec for request and response frames
//! - **TimeoutClock**: restartable deadlines

mod builder;
mod engine;
pub mod error;
pub mod locator;
mod reactor;
pub mod request;
pub mod service_key;
pub mod time;
mod utils;
pub mod wire;

pub use builder::{DEFAULT_TIMEOUT, EngineBuilder};
pub use engine::{CallerId, Engine, EventWanted, MAXIMUM_TRY_COUNT};
pub use error::{Fault, FaultCode, FaultKind};
pub use locator::{DirectoryLocator, Locator, MapLocator};
pub use reactor::poller::{Poller, SystemPoller};
pub use request::{Attributes, Interest, Location, Request, RequestHandle, RequestState};
pub use service_key::{Serialization, ServiceKey};
