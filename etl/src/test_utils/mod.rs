//! Helpers shared by unit and integration tests.
//!
//! - [`config`] builds replicator and task configurations without a file.
//! - [`oplog`] builds raw change-log entries the way a replica set writes them.
//! - [`notify`] waits on notifications and task phases with a timeout, so a test that never
//!   reaches the expected state fails instead of hanging.

pub mod config;
pub mod notify;
pub mod oplog;
