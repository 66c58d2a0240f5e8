use bitflags::bitflags;

bitflags! {
    /// Per-request behaviour flags.
    ///
    /// `KEEP_AFFINITY` requires `NO_RETRY` and excludes `NO_WAIT`; both rules
    /// are enforced when the request is added.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Attributes: u32 {
        /// The service sends no response; an immediate close is success.
        const NO_WAIT = 1 << 0;
        /// Only local services may handle the request.
        const NO_REMOTE = 1 << 1;
        /// A failed exchange is never attempted again.
        const NO_RETRY = 1 << 2;
        /// Keep the connection open after a successful exchange.
        const KEEP_AFFINITY = 1 << 3;
        /// Reuse the connection kept by a previous `KEEP_AFFINITY` request.
        const NEED_AFFINITY = 1 << 4;
    }
}
