use etl_config::shared::{IndexConfig, LoadConfig};
use std::future::Future;

use crate::error::EtlResult;
use crate::types::Mutation;

/// Trait for search indices that receive replicated mutations.
///
/// [`Destination`] implementations own the target cluster: index lifecycle at startup and the
/// bulk writes issued by every task worker. A single instance is shared by all workers, so
/// implementations must accept concurrent calls.
///
/// Writes are not retried by the caller. A failed [`Destination::bulk`] call loses its batch,
/// which keeps replication moving when the target rejects individual documents. Request
/// timeouts are the implementation's responsibility.
pub trait Destination {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Propagates the shutdown signal to the destination.
    ///
    /// The default implementation is a no-op.
    fn shutdown(&self) -> impl Future<Output = EtlResult<()>> + Send {
        async { Ok(()) }
    }

    /// Returns whether `index` exists on the target.
    fn index_exists(&self, index: &str) -> impl Future<Output = EtlResult<bool>> + Send;

    /// Creates the index described by `index` with its settings and mappings body.
    fn create_index(&self, index: &IndexConfig) -> impl Future<Output = EtlResult<()>> + Send;

    /// Applies the mapping of a task's target index.
    ///
    /// Called once per task before any worker starts, whether or not the index was created
    /// by this process.
    fn put_mapping(&self, load: &LoadConfig) -> impl Future<Output = EtlResult<()>> + Send;

    /// Writes a batch of mutations to the task's target index.
    ///
    /// Mutations must be applied in the order given. The call fails as a whole when any of
    /// them is rejected.
    fn bulk(
        &self,
        load: &LoadConfig,
        mutations: Vec<Mutation>,
    ) -> impl Future<Output = EtlResult<()>> + Send;
}
