//! Configuration types and loading for the MongoDB to Elasticsearch replicator.
//!
//! The [`shared`] module holds the serde types shared by the core library and the replicator
//! binary, while [`load_config_from_path`] reads them from a file with environment overrides.

mod load;
pub mod shared;

pub use load::{Config, FileFormatError, LoadConfigError, load_config_from_path};
