use etl_config::shared::{IndexConfig, LoadConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::info;

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::types::Mutation;

type BulkCondition = Box<dyn Fn(&[BulkCall]) -> bool + Send + Sync>;

/// One accepted [`Destination::bulk`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkCall {
    pub index: String,
    pub mutations: Vec<Mutation>,
}

struct Inner {
    indices: BTreeMap<String, Option<serde_json::Value>>,
    created_indices: Vec<String>,
    mappings: Vec<LoadConfig>,
    bulk_calls: Vec<BulkCall>,
    failed_bulk_calls: Vec<BulkCall>,
    bulk_failures_left: usize,
    fail_setup: bool,
    shut_down: bool,
    bulk_conditions: Vec<(BulkCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let calls = &self.bulk_calls;
        self.bulk_conditions.retain(|(condition, notify)| {
            let satisfied = condition(calls);
            if satisfied {
                notify.notify_one();
            }
            !satisfied
        });
    }
}

/// In-memory destination for testing and development purposes.
///
/// [`MemoryDestination`] keeps every index, mapping and bulk call it receives, and can be
/// told to fail bulk writes or index setup to exercise the error paths of a pipeline.
#[derive(Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        let inner = Inner {
            indices: BTreeMap::new(),
            created_indices: Vec::new(),
            mappings: Vec::new(),
            bulk_calls: Vec::new(),
            failed_bulk_calls: Vec::new(),
            bulk_failures_left: 0,
            fail_setup: false,
            shut_down: false,
            bulk_conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Registers an index as already present on the target.
    pub async fn add_existing_index(&self, index: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.indices.insert(index.into(), None);
    }

    /// Makes the next `count` bulk calls fail.
    pub async fn fail_next_bulks(&self, count: usize) {
        let mut inner = self.inner.lock().await;
        inner.bulk_failures_left = count;
    }

    /// Makes every index creation and mapping call fail.
    pub async fn fail_setup(&self) {
        let mut inner = self.inner.lock().await;
        inner.fail_setup = true;
    }

    /// Returns the names of every index known to the destination.
    pub async fn indices(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.indices.keys().cloned().collect()
    }

    /// Returns the indices created through [`Destination::create_index`], in call order.
    pub async fn created_indices(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.created_indices.clone()
    }

    pub async fn mappings(&self) -> Vec<LoadConfig> {
        let inner = self.inner.lock().await;
        inner.mappings.clone()
    }

    /// Returns every accepted bulk call, in call order.
    pub async fn bulk_calls(&self) -> Vec<BulkCall> {
        let inner = self.inner.lock().await;
        inner.bulk_calls.clone()
    }

    /// Returns the bulk calls that were rejected by an injected failure.
    pub async fn failed_bulk_calls(&self) -> Vec<BulkCall> {
        let inner = self.inner.lock().await;
        inner.failed_bulk_calls.clone()
    }

    /// Returns every accepted mutation, flattened across bulk calls.
    pub async fn mutations(&self) -> Vec<Mutation> {
        let inner = self.inner.lock().await;
        inner
            .bulk_calls
            .iter()
            .flat_map(|call| call.mutations.iter().cloned())
            .collect()
    }

    /// Returns a [`Notify`] that fires once `condition` holds for the accepted bulk calls.
    ///
    /// The condition is evaluated immediately and after every accepted call.
    pub async fn notify_on_bulk_calls<F>(&self, condition: F) -> Arc<Notify>
    where
        F: Fn(&[BulkCall]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        inner
            .bulk_conditions
            .push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        notify
    }

    /// Returns a [`Notify`] that fires once at least `count` mutations were accepted.
    pub async fn notify_on_mutations(&self, count: usize) -> Arc<Notify> {
        self.notify_on_bulk_calls(move |calls| {
            calls.iter().map(|call| call.mutations.len()).sum::<usize>() >= count
        })
        .await
    }

    /// Returns whether [`Destination::shutdown`] was called.
    pub async fn is_shut_down(&self) -> bool {
        self.inner.lock().await.shut_down
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.bulk_calls.clear();
        inner.failed_bulk_calls.clear();
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn shutdown(&self) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.shut_down = true;

        Ok(())
    }

    async fn index_exists(&self, index: &str) -> EtlResult<bool> {
        let inner = self.inner.lock().await;
        if inner.fail_setup {
            bail!(
                ErrorKind::DestinationIndexSetupFailed,
                "Index lookup failed",
                index
            );
        }

        Ok(inner.indices.contains_key(index))
    }

    async fn create_index(&self, index: &IndexConfig) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_setup {
            bail!(
                ErrorKind::DestinationIndexSetupFailed,
                "Index creation failed",
                index.index
            );
        }

        info!(index = %index.index, "creating index");
        inner
            .indices
            .insert(index.index.clone(), index.body.clone());
        inner.created_indices.push(index.index.clone());

        Ok(())
    }

    async fn put_mapping(&self, load: &LoadConfig) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_setup {
            bail!(
                ErrorKind::DestinationIndexSetupFailed,
                "Mapping update failed",
                load.index
            );
        }

        info!(index = %load.index, "putting mapping");
        inner.indices.entry(load.index.clone()).or_insert(None);
        inner.mappings.push(load.clone());

        Ok(())
    }

    async fn bulk(&self, load: &LoadConfig, mutations: Vec<Mutation>) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        let call = BulkCall {
            index: load.index.clone(),
            mutations,
        };

        if inner.bulk_failures_left > 0 {
            inner.bulk_failures_left -= 1;
            inner.failed_bulk_calls.push(call);
            bail!(
                ErrorKind::DestinationBulkFailed,
                "Bulk request was rejected",
                load.index
            );
        }

        info!(index = %call.index, count = call.mutations.len(), "writing mutations");
        inner.bulk_calls.push(call);
        inner.check_conditions();

        Ok(())
    }
}
