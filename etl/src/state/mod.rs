//! Observable progress of task workers.

pub mod task;
