use etl_config::shared::ReplicatorConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::destination::Destination;
use crate::error::EtlResult;
use crate::source::Source;
use crate::state::task::{TaskPhase, TaskPhaseRx};
use crate::transform::Transformer;
use crate::workers::pool::TaskWorkerPool;
use crate::workers::task::TaskWorker;

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started {
        pool: TaskWorkerPool,
        phases: BTreeMap<String, TaskPhaseRx>,
    },
}

/// Runs every configured task against a shared source, destination and transformer.
///
/// Startup prepares the target indices one call at a time and fails as a whole on the first
/// error. Once started, each task runs in its own worker and nothing a worker does can stop
/// the others.
#[derive(Debug)]
pub struct Pipeline<S, D, T> {
    config: Arc<ReplicatorConfig>,
    source: S,
    destination: D,
    transformer: T,
    state: PipelineState,
}

impl<S, D, T> Pipeline<S, D, T>
where
    S: Source + Clone + Send + Sync + 'static,
    D: Destination + Clone + Send + Sync + 'static,
    T: Transformer + Clone + Send + Sync + 'static,
{
    /// Creates a pipeline, appending the configured index name suffix to every index it
    /// creates or writes to.
    pub fn new(mut config: ReplicatorConfig, source: S, destination: D, transformer: T) -> Self {
        let suffix = config.controls.index_name_suffix().to_string();
        if !suffix.is_empty() {
            for index in &mut config.elasticsearch.indices {
                *index = index.with_suffix(&suffix);
            }
            for task in config.tasks.values_mut() {
                task.load = task.load.with_suffix(&suffix);
            }
        }

        Self {
            config: Arc::new(config),
            source,
            destination,
            transformer,
            state: PipelineState::NotStarted,
        }
    }

    /// Returns the configuration as used by the pipeline, suffixes included.
    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    pub async fn start(&mut self) -> EtlResult<()> {
        if matches!(self.state, PipelineState::Started { .. }) {
            warn!("pipeline was already started");
            return Ok(());
        }

        info!(
            tasks = self.config.tasks.len(),
            source = S::name(),
            destination = D::name(),
            "starting pipeline"
        );

        self.prepare_indices().await?;

        let pool = TaskWorkerPool::new();
        let controls = Arc::new(self.config.controls.clone());
        let mut phases = BTreeMap::new();

        for (name, task) in &self.config.tasks {
            let worker = TaskWorker::new(
                name.clone(),
                Arc::new(task.clone()),
                controls.clone(),
                self.source.clone(),
                self.destination.clone(),
                self.transformer.clone(),
            );
            phases.insert(name.clone(), worker.subscribe());
            pool.spawn(name.clone(), worker.run()).await;
        }

        self.state = PipelineState::Started { pool, phases };

        Ok(())
    }

    async fn prepare_indices(&self) -> EtlResult<()> {
        for index in &self.config.elasticsearch.indices {
            if self.destination.index_exists(&index.index).await? {
                info!(index = %index.index, "index already exists");
                continue;
            }

            self.destination.create_index(index).await?;
            info!(index = %index.index, "create index");
        }

        for (name, task) in &self.config.tasks {
            self.destination.put_mapping(&task.load).await?;
            info!(
                task = %name,
                index = %task.load.index,
                doc_type = ?task.load.doc_type,
                "put mapping"
            );
        }

        Ok(())
    }

    /// Returns the current phase of every task, or an empty map before [`Pipeline::start`].
    pub fn task_phases(&self) -> BTreeMap<String, TaskPhase> {
        match &self.state {
            PipelineState::NotStarted => BTreeMap::new(),
            PipelineState::Started { phases, .. } => phases
                .iter()
                .map(|(name, rx)| (name.clone(), rx.borrow().clone()))
                .collect(),
        }
    }

    /// Returns a receiver of the phases of task `name`.
    pub fn subscribe(&self, name: &str) -> Option<TaskPhaseRx> {
        match &self.state {
            PipelineState::NotStarted => None,
            PipelineState::Started { phases, .. } => phases.get(name).cloned(),
        }
    }

    /// Waits until every task worker finished.
    ///
    /// Workers only finish when their task halts, so in normal operation this never returns.
    /// Dropping the pipeline aborts the workers.
    pub async fn wait(&self) -> EtlResult<()> {
        let PipelineState::Started { pool, .. } = &self.state else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        info!("waiting for task workers to complete");

        pool.wait_all().await
    }

    /// Aborts every task worker, then shuts the destination down.
    pub async fn shutdown(self) -> EtlResult<()> {
        let Self {
            destination, state, ..
        } = self;

        if let PipelineState::Started { pool, .. } = state {
            info!(workers = pool.len().await, "aborting task workers");
        }

        destination.shutdown().await
    }
}
