use etl::destination::Destination;
use etl::destination::elasticsearch::ElasticsearchDestination;
use etl::pipeline::Pipeline;
use etl::source::Source;
use etl::source::mongo::MongoSource;
use etl::transform::{MappingTransformer, Transformer};
use etl_config::shared::{
    ControlsConfig, ElasticsearchConfig, MongoConfig, ReplicatorConfig, TaskConfig,
};
use std::collections::BTreeMap;
use etl::error::ErrorKind;
use etl::etl_error;
use tracing::{debug, error, info, warn};

use crate::error::ReplicatorResult;

/// Starts the replicator service with the provided configuration.
///
/// Connects to both ends, prepares the indices and runs every task until a shutdown signal
/// arrives or all tasks halted.
pub async fn start_replicator_with_config(
    replicator_config: ReplicatorConfig,
) -> ReplicatorResult<()> {
    info!("starting replicator service");

    log_config(&replicator_config);

    let source = MongoSource::connect(&replicator_config.mongodb).await?;
    let destination = ElasticsearchDestination::connect(&replicator_config.elasticsearch).await?;

    let pipeline = Pipeline::new(
        replicator_config,
        source,
        destination,
        MappingTransformer::new(),
    );
    start_pipeline(pipeline).await?;

    info!("replicator service completed");

    Ok(())
}

fn log_config(config: &ReplicatorConfig) {
    log_mongo_config(&config.mongodb);
    log_elasticsearch_config(&config.elasticsearch);
    log_controls_config(&config.controls);
    log_tasks_config(&config.tasks);
}

fn log_mongo_config(config: &MongoConfig) {
    debug!(
        app_name = config.options.app_name,
        max_pool_size = config.options.max_pool_size,
        connect_timeout_ms = config.options.connect_timeout_ms,
        "source mongodb config"
    );
}

fn log_elasticsearch_config(config: &ElasticsearchConfig) {
    let indices: Vec<&str> = config.indices.iter().map(|index| index.index.as_str()).collect();
    debug!(
        url = config.url,
        username = config.username,
        request_timeout_ms = config.request_timeout_ms,
        ?indices,
        "destination elasticsearch config"
    );
}

fn log_controls_config(config: &ControlsConfig) {
    debug!(
        read_capacity = config.read_capacity(),
        bulk_size = config.bulk_size(),
        index_name_suffix = config.index_name_suffix(),
        rewind_ms = config.tail_retry.rewind_ms,
        "controls config"
    );
}

fn log_tasks_config(tasks: &BTreeMap<String, TaskConfig>) {
    if tasks.is_empty() {
        warn!("no tasks configured, the replicator will stop once indices are prepared");
    }

    for (name, task) in tasks {
        debug!(
            task = %name,
            namespace = %task.extract.namespace(),
            index = %task.load.index,
            phase = ?task.from.phase,
            "task config"
        );
    }
}

/// Starts a pipeline and runs it until a shutdown signal or until every task halted.
///
/// Workers hold no state worth flushing, so on a signal they are aborted. The checkpoints to
/// restart from are in the logs. Tasks are expected to run forever, so running out of tasks
/// is reported as an error.
#[tracing::instrument(skip(pipeline))]
async fn start_pipeline<S, D, T>(mut pipeline: Pipeline<S, D, T>) -> ReplicatorResult<()>
where
    S: Source + Clone + Send + Sync + 'static,
    D: Destination + Clone + Send + Sync + 'static,
    T: Transformer + Clone + Send + Sync + 'static,
{
    pipeline.start().await?;

    let halted = tokio::select! {
        result = pipeline.wait() => {
            result?;
            true
        }
        signal = shutdown_signal() => {
            signal?;
            info!(phases = ?pipeline.task_phases(), "shutting down pipeline");
            false
        }
    };

    pipeline.shutdown().await?;

    if halted {
        error!("every task halted, stopping replicator");
        return Err(etl_error!(ErrorKind::TasksHalted, "Every replication task halted").into());
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("sigint (ctrl+c) received");
        }
        _ = sigterm.recv() => {
            info!("sigterm received");
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("ctrl+c received");

    Ok(())
}
