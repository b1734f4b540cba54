mod base;
pub mod memory;
pub mod mongo;

pub use base::{DocumentStream, Source};
