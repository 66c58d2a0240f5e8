//! The multiplexing call the engine blocks in.
//!
//! By default the engine calls `poll(2)` through [`SystemPoller`]. A caller
//! can install any other [`Poller`] as a proxy, typically one that parks the
//! current cooperative task until a descriptor is ready and lets other tasks
//! use the engine meanwhile.
//!
//! # Example
//!
//! ```ignore
//! use sockrpc::{Engine, SystemPoller};
//! use std::sync::Arc;
//!
//! let engine = Engine::builder().build();
//! let previous = engine.set_poll_proxy(Some(Arc::new(|fds: &mut [libc::pollfd], timeout_ms: i32| {
//!     SystemPoller.poll(fds, timeout_ms)
//! })));
//! assert!(previous.is_none());
//! ```

use libc::pollfd;
use std::io;

/// A `poll(2)` compatible readiness wait.
///
/// Implementations fill in `revents` of each entry and return how many
/// entries have non-zero `revents`; `Ok(0)` means the timeout expired.
/// Errors of kind [`io::ErrorKind::Interrupted`] or
/// [`io::ErrorKind::WouldBlock`] make the engine retry; any other error is
/// treated as a failure of the multiplexing layer itself.
pub trait Poller: Send + Sync {
    fn poll(&self, fds: &mut [pollfd], timeout_ms: i32) -> io::Result<usize>;
}

impl<F> Poller for F
where
    F: Fn(&mut [pollfd], i32) -> io::Result<usize> + Send + Sync,
{
    fn poll(&self, fds: &mut [pollfd], timeout_ms: i32) -> io::Result<usize> {
        self(fds, timeout_ms)
    }
}

/// The operating system's `poll(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPoller;

impl Poller for SystemPoller {
    fn poll(&self, fds: &mut [pollfd], timeout_ms: i32) -> io::Result<usize> {
        let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(res as usize)
    }
}
