//! Work queues for controllers.
//!
//! An item is never handed to two workers at once. Adding an item which is
//! already queued is a no-op, adding one that is being processed queues it
//! again once the worker calls `done`.

mod rate_limiting;
mod work_queue;

pub use rate_limiting::RateLimitingQueue;
pub use work_queue::WorkQueue;
