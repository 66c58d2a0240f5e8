//! Fluent builder for [`Engine`] construction.

use crate::engine::Engine;
use crate::engine::core::EngineCore;
use crate::locator::Locator;
use crate::reactor::poller::Poller;
use crate::reactor::socket::ignore_sigpipe;

use std::sync::Arc;
use std::time::Duration;

/// Batch budget given to callers unless they set their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(4000);

/// Builder for constructing [`Engine`] instances.
///
/// # Example
/// ```ignore
/// let engine = EngineBuilder::new()
///     .locator(DirectoryLocator::new("/var/run/services"))
///     .default_timeout(Duration::from_secs(2))
///     .debug(true)
///     .build();
/// ```
pub struct EngineBuilder {
    locator: Option<Arc<dyn Locator>>,
    proxy: Option<Arc<dyn Poller>>,
    debug: bool,
    default_timeout: Duration,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            locator: None,
            proxy: None,
            debug: false,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets how service keys are resolved. An engine without a locator
    /// rejects every request with `NotInitialized`.
    pub fn locator(mut self, locator: impl Locator + 'static) -> Self {
        self.locator = Some(Arc::new(locator));
        self
    }

    pub fn shared_locator(mut self, locator: Arc<dyn Locator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Replaces `poll(2)` with `proxy` from the start.
    pub fn poll_proxy(mut self, proxy: Arc<dyn Poller>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Enables trace-level dumps of request I/O.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the batch budget new callers start with.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Builds the engine.
    ///
    /// SIGPIPE is ignored process-wide from here on, so writes to a closed
    /// service connection fail with `EPIPE`.
    pub fn build(self) -> Engine {
        ignore_sigpipe();

        Engine::from_core(EngineCore::new(
            self.locator,
            self.proxy,
            self.debug,
            self.default_timeout,
        ))
    }
}
