//! The request engine.
//!
//! # Architecture
//!
//! - **Engine**: shared handle; owns the request arena, the pending queue
//!   and the registered callers behind one mutex
//! - **CallerContext**: per-caller counters, completed queue, batch deadline
//!   and poll array
//! - **RequestQueue**: LIFO queue of request handles
//! - **WaitCondition**: what a wait call is waiting for
//! - **dispatch**: the poll loop that advances requests
//! - **event**: the same progression driven by an external event loop

pub(crate) mod caller;
pub(crate) mod condition;
pub(crate) mod core;
pub(crate) mod dispatch;
pub(crate) mod event;
pub(crate) mod queue;

pub use caller::CallerId;
pub use self::core::{Engine, MAXIMUM_TRY_COUNT};
pub use event::EventWanted;
