//! Operating system layer.
//!
//! - [`socket`]: non-blocking Unix socket creation and connect
//! - [`io`]: gathered writes and reads on raw descriptors
//! - [`poller`]: the readiness wait the engine blocks in

pub(crate) mod io;
pub mod poller;
pub(crate) mod socket;
