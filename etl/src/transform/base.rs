use bson::Document;
use etl_config::shared::TaskConfig;
use std::future::Future;

use crate::types::{Mutation, OplogEntry};

/// Trait for turning source records into index mutations.
///
/// Returning `None` drops the record. Transformers are shared by every task worker and only
/// receive the task they are called for.
pub trait Transformer {
    /// Transforms a document read by the snapshot scan.
    fn document(&self, task: &TaskConfig, document: Document) -> Option<Mutation>;

    /// Transforms a change-log entry.
    ///
    /// Entries of one task are transformed one at a time, in change-log order.
    fn oplog(
        &self,
        task: &TaskConfig,
        entry: OplogEntry,
    ) -> impl Future<Output = Option<Mutation>> + Send;
}
