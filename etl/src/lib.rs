//! Change data capture from MongoDB into Elasticsearch.
//!
//! A [`pipeline::Pipeline`] runs one worker per configured task. Each worker optionally scans
//! the task's collection from a checkpoint, then follows the replica-set change log forever,
//! turning documents and change-log entries into [`types::Mutation`]s that are written to the
//! destination in bulk.

pub mod concurrency;
pub mod conversions;
pub mod destination;
pub mod error;
mod macros;
pub mod pipeline;
pub mod replication;
pub mod source;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transform;
pub mod types;
pub mod workers;
