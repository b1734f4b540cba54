mod base;
pub mod elasticsearch;
pub mod memory;

pub use base::Destination;
