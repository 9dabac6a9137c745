//! Background execution primitives
//!
//! - [`TaskQueue`]: fire-and-forget work with bounded concurrency, a bounded
//!   backlog and a drain-on-shutdown contract
//! - [`spawn_periodic`]: fixed-period loops for the flush, archive and
//!   heartbeat workers

mod periodic;
mod task_queue;

pub use periodic::spawn_periodic;
pub use task_queue::{TaskQueue, TaskQueueConfig};
