//! Task workers and the pool that runs them.
//!
//! - [`task`] - per-task scan and tail state machine
//! - [`pool`] - concurrent, independent execution of task workers

pub mod pool;
pub mod task;
