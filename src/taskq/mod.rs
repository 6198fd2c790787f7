//! Task queue, lifecycle tracker, and the proxy keeping both in sync.
//!
//! The queue is a plain FIFO, the tracker a lifecycle table; the
//! [`TaskProxy`] is the recommended (and only synchronized) way of using
//! the two together.

pub mod proxy;
pub mod queue;
pub mod state;
pub mod tracker;

pub use proxy::TaskProxy;
pub use queue::Queue;
pub use state::CompletionState;
pub use tracker::Tracker;
