//! Common types flowing through the pipeline.
//!
//! Documents come out of the source as [`bson::Document`]s, change-log entries are parsed into
//! [`OplogEntry`] values and both end up as [`Mutation`]s handed to the destination.

mod mutation;
mod oplog;

pub use mutation::*;
pub use oplog::*;

pub use bson::Document;
pub use bson::oid::ObjectId;
