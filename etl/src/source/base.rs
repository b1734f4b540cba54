use bson::Document;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use etl_config::shared::ExtractConfig;
use futures::stream::BoxStream;
use std::future::Future;

use crate::error::EtlResult;

/// Stream of raw documents read from a source.
///
/// A read failure is delivered as an `Err` item; the stream is not expected to yield anything
/// after it.
pub type DocumentStream = BoxStream<'static, EtlResult<Document>>;

/// Trait for document stores that can be snapshotted and followed.
///
/// A [`Source`] hands out cursors; ordering, filtering of change-log entries, throttling and
/// retries are handled by the replication streams built on top of it.
pub trait Source {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Opens a snapshot cursor over the task's collection.
    ///
    /// The cursor yields documents with `_id <= upper_bound` matching the task query, projected
    /// with the task projection, newest insertion first. It ends when the collection is
    /// exhausted.
    fn scan(
        &self,
        extract: &ExtractConfig,
        upper_bound: ObjectId,
    ) -> impl Future<Output = EtlResult<DocumentStream>> + Send;

    /// Opens a change-log cursor for the task's namespace starting at `from`.
    ///
    /// The cursor waits for new entries instead of ending, so a normally completing stream
    /// means the server closed it.
    fn tail(
        &self,
        extract: &ExtractConfig,
        from: DateTime<Utc>,
    ) -> impl Future<Output = EtlResult<DocumentStream>> + Send;
}
