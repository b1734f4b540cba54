use bson::Document;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use etl_config::shared::{BatchConfig, CheckpointPhase, ControlsConfig, TaskConfig};
use futures::StreamExt;
use futures::stream::BoxStream;
use futures::stream;
use std::sync::Arc;
use tokio::pin;
use tracing::{Instrument, error, info, warn};

use crate::concurrency::stream::BatchStream;
use crate::conversions::document::id_to_string;
use crate::destination::Destination;
use crate::error::{EtlError, EtlResult};
use crate::replication::retry::TailRetryManager;
use crate::replication::scan::scan;
use crate::replication::tail::tail;
use crate::source::Source;
use crate::state::task::{TaskPhase, TaskPhaseRx, TaskPhaseTx, create_task_phase_channel};
use crate::transform::Transformer;
use crate::types::Mutation;

/// Fill window of every batch sent to the destination.
pub const BULK_MAX_FILL_MS: u64 = 1000;

/// Micro-batch of change-log entries handed to the transformer.
pub const TAIL_ENTRY_BATCH: BatchConfig = BatchConfig {
    max_size: 50,
    max_fill_ms: 1000,
};

/// A transformed change-log entry.
///
/// Entries the transformer dropped are kept as `None` so the worker still sees the tail
/// making progress.
struct TailItem {
    ts: DateTime<Utc>,
    mutation: Option<Mutation>,
}

/// Why a single tail attempt stopped.
enum TailOutcome {
    Failed(EtlError),
    Completed,
}

/// Drives one task: an optional snapshot scan followed by an endless change-log tail.
///
/// Batches are applied one at a time and in order. A batch the destination rejects is logged
/// and dropped; a scan failure ends the scan and moves on to the tail; a tail failure restarts
/// the tail a rewind window before the failure, forever.
pub struct TaskWorker<S, D, T> {
    name: String,
    task: Arc<TaskConfig>,
    controls: Arc<ControlsConfig>,
    source: S,
    destination: D,
    transformer: T,
    phase_tx: TaskPhaseTx,
}

impl<S, D, T> TaskWorker<S, D, T>
where
    S: Source + Send + Sync + 'static,
    D: Destination + Send + Sync + 'static,
    T: Transformer + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        task: Arc<TaskConfig>,
        controls: Arc<ControlsConfig>,
        source: S,
        destination: D,
        transformer: T,
    ) -> Self {
        let (phase_tx, _) = create_task_phase_channel();

        Self {
            name: name.into(),
            task,
            controls,
            source,
            destination,
            transformer,
            phase_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a receiver of the phases published by this worker.
    pub fn subscribe(&self) -> TaskPhaseRx {
        self.phase_tx.subscribe()
    }

    /// Runs the task until it halts.
    ///
    /// Only an unusable checkpoint makes this return an error; every other failure is handled
    /// inside the worker.
    pub async fn run(self) -> EtlResult<()> {
        let span = tracing::info_span!("task_worker", task = %self.name);

        async move {
            let entered_at = Utc::now();
            let tail_from = self.task.from.start_time().unwrap_or(entered_at);

            if self.task.from.phase == CheckpointPhase::Scan {
                let upper_bound = ObjectId::parse_str(self.task.from.scan_upper_bound())?;
                self.run_scan(upper_bound, tail_from).await;
            }

            self.run_tail(tail_from).await;

            Ok(())
        }
        .instrument(span.or_current())
        .await
    }

    fn publish(&self, phase: TaskPhase) {
        // Stored even when nobody subscribed yet.
        self.phase_tx.send_replace(phase);
    }

    async fn run_scan(&self, upper_bound: ObjectId, tail_from: DateTime<Utc>) {
        info!(task = %self.name, upper_bound = %upper_bound, "scan start");

        let mut last_id = None;
        let mut scanned = 0u64;
        self.publish(TaskPhase::Scanning {
            tail_from,
            last_id: None,
            scanned,
        });

        let documents = match scan(
            &self.source,
            &self.task.extract,
            upper_bound,
            self.controls.read_capacity(),
        )
        .await
        {
            Ok(documents) => documents,
            Err(err) => {
                error!(task = %self.name, error = %err, "scan failed to start, moving on to tail");
                return;
            }
        };

        let batches = BatchStream::wrap(
            documents,
            BatchConfig::new(self.controls.bulk_size(), BULK_MAX_FILL_MS),
        );
        pin!(batches);

        while let Some(batch) = batches.next().await {
            let mut documents: Vec<Document> = Vec::with_capacity(batch.len());
            let mut failure = None;
            for item in batch {
                match item {
                    Ok(document) => documents.push(document),
                    Err(err) => failure = Some(err),
                }
            }

            if !documents.is_empty() {
                scanned += documents.len() as u64;
                if let Some(id) = documents.last().and_then(|document| document.get("_id")) {
                    last_id = Some(id_to_string(id));
                }

                self.apply_scan_batch(documents, last_id.as_deref()).await;
                self.publish(TaskPhase::Scanning {
                    tail_from,
                    last_id: last_id.clone(),
                    scanned,
                });
            }

            if let Some(err) = failure {
                error!(
                    task = %self.name,
                    error = %err,
                    checkpoint_id = last_id.as_deref(),
                    "scan failed, moving on to tail"
                );
                return;
            }
        }

        info!(task = %self.name, count = scanned, "scan end");
    }

    async fn apply_scan_batch(&self, documents: Vec<Document>, checkpoint_id: Option<&str>) {
        let count = documents.len();
        let mutations: Vec<Mutation> = documents
            .into_iter()
            .filter_map(|document| self.transformer.document(&self.task, document))
            .collect();

        if mutations.is_empty() {
            return;
        }

        match self.destination.bulk(&self.task.load, mutations).await {
            Ok(()) => info!(task = %self.name, count, checkpoint_id, "scan batch applied"),
            Err(err) => warn!(
                task = %self.name,
                count,
                checkpoint_id,
                error = %err,
                "scan batch dropped"
            ),
        }
    }

    async fn run_tail(&self, from: DateTime<Utc>) {
        let mut retry = TailRetryManager::new(self.controls.tail_retry.clone());
        let mut resume_from = from;
        let mut last_ts = None;

        loop {
            self.publish(TaskPhase::Tailing {
                resume_from,
                last_ts,
                attempt: retry.attempt_count(),
            });
            info!(task = %self.name, from = %resume_from, "tail start");

            match self.follow(resume_from, &mut retry, &mut last_ts).await {
                TailOutcome::Completed => {
                    error!(task = %self.name, "tail should not complete, halting task");
                    self.publish(TaskPhase::Halted { last_ts });
                    return;
                }
                TailOutcome::Failed(err) => {
                    resume_from = retry.record_failure(err.clone(), Utc::now());
                    let delay = retry.calculate_backoff();

                    error!(
                        task = %self.name,
                        error = %err,
                        resume_from = %resume_from,
                        attempt = retry.attempt_count(),
                        delay_ms = delay.as_millis() as u64,
                        "tail failed, restarting"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Runs one tail attempt until its stream fails or ends.
    async fn follow(
        &self,
        from: DateTime<Utc>,
        retry: &mut TailRetryManager,
        last_ts: &mut Option<DateTime<Utc>>,
    ) -> TailOutcome {
        let entries = match tail(&self.source, &self.task.extract, from).await {
            Ok(entries) => entries,
            Err(err) => return TailOutcome::Failed(err),
        };

        let task = &self.task;
        let transformer = &self.transformer;
        let items: BoxStream<'_, EtlResult<TailItem>> = BatchStream::wrap(entries, TAIL_ENTRY_BATCH)
            .then(move |entries| async move {
                let mut items = Vec::with_capacity(entries.len());
                for entry in entries {
                    match entry {
                        Ok(entry) => {
                            let ts = entry.timestamp();
                            let mutation = transformer.oplog(task, entry).await;
                            items.push(Ok(TailItem { ts, mutation }));
                        }
                        Err(err) => {
                            items.push(Err(err));
                            break;
                        }
                    }
                }

                stream::iter(items)
            })
            .flatten()
            .boxed();

        let batches = BatchStream::wrap(
            items,
            BatchConfig::new(self.controls.bulk_size(), BULK_MAX_FILL_MS),
        );
        pin!(batches);

        while let Some(batch) = batches.next().await {
            let mut mutations = Vec::with_capacity(batch.len());
            let mut received = false;
            let mut failure = None;
            for item in batch {
                match item {
                    Ok(item) => {
                        received = true;
                        *last_ts = Some(item.ts);
                        mutations.extend(item.mutation);
                    }
                    Err(err) => failure = Some(err),
                }
            }

            if received && retry.record_progress() {
                info!(task = %self.name, "tail recovered");
            }

            self.apply_tail_batch(mutations, *last_ts).await;
            self.publish(TaskPhase::Tailing {
                resume_from: from,
                last_ts: *last_ts,
                attempt: retry.attempt_count(),
            });

            if let Some(err) = failure {
                return TailOutcome::Failed(err);
            }
        }

        TailOutcome::Completed
    }

    async fn apply_tail_batch(
        &self,
        mutations: Vec<Mutation>,
        checkpoint_time: Option<DateTime<Utc>>,
    ) {
        if mutations.is_empty() {
            return;
        }

        let count = mutations.len();
        let checkpoint_time = checkpoint_time.map(|ts| ts.to_rfc3339());
        let checkpoint_time = checkpoint_time.as_deref();
        match self.destination.bulk(&self.task.load, mutations).await {
            Ok(()) => info!(task = %self.name, count, checkpoint_time, "tail batch applied"),
            Err(err) => warn!(
                task = %self.name,
                count,
                checkpoint_time,
                error = %err,
                "tail batch dropped"
            ),
        }
    }
}
