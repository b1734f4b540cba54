use chrono::{DateTime, Utc};
use etl_config::shared::{CheckpointConfig, CheckpointPhase, CheckpointTime};
use std::fmt;
use tokio::sync::watch;

/// Progress of one replication task.
///
/// The phase is published by the task worker and can be read at any time. Nothing is
/// persisted; [`TaskPhase::checkpoint`] renders the resume point an operator would put back in
/// the configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPhase {
    /// The worker has not read its checkpoint yet.
    Idle,
    /// The snapshot scan is running.
    Scanning {
        /// Where the change-log tail will start once the scan is over.
        tail_from: DateTime<Utc>,
        /// `_id` of the last document of the last applied batch.
        last_id: Option<String>,
        /// Documents delivered by the scan so far.
        scanned: u64,
    },
    /// The change log is being followed.
    Tailing {
        /// Start time of the current tail attempt.
        resume_from: DateTime<Utc>,
        /// Timestamp of the last entry of the last applied batch.
        last_ts: Option<DateTime<Utc>>,
        /// Consecutive failed attempts, reset once an entry arrives.
        attempt: u32,
    },
    /// The change log ended unexpectedly and the worker stopped.
    Halted {
        last_ts: Option<DateTime<Utc>>,
    },
}

impl TaskPhase {
    /// Returns the checkpoint that resumes the task from its current progress.
    pub fn checkpoint(&self) -> Option<CheckpointConfig> {
        match self {
            TaskPhase::Idle => None,
            TaskPhase::Scanning {
                tail_from, last_id, ..
            } => Some(CheckpointConfig {
                phase: CheckpointPhase::Scan,
                time: Some(CheckpointTime::Millis(tail_from.timestamp_millis())),
                id: last_id.clone(),
            }),
            TaskPhase::Tailing {
                resume_from,
                last_ts,
                ..
            } => Some(CheckpointConfig {
                phase: CheckpointPhase::Tail,
                time: Some(CheckpointTime::Millis(
                    last_ts.unwrap_or(*resume_from).timestamp_millis(),
                )),
                id: None,
            }),
            TaskPhase::Halted { last_ts } => last_ts.map(|last_ts| CheckpointConfig {
                phase: CheckpointPhase::Tail,
                time: Some(CheckpointTime::Millis(last_ts.timestamp_millis())),
                id: None,
            }),
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, TaskPhase::Halted { .. })
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPhase::Idle => write!(f, "idle"),
            TaskPhase::Scanning { .. } => write!(f, "scanning"),
            TaskPhase::Tailing { .. } => write!(f, "tailing"),
            TaskPhase::Halted { .. } => write!(f, "halted"),
        }
    }
}

pub type TaskPhaseTx = watch::Sender<TaskPhase>;
pub type TaskPhaseRx = watch::Receiver<TaskPhase>;

/// Creates the channel a task worker publishes its phase on.
pub fn create_task_phase_channel() -> (TaskPhaseTx, TaskPhaseRx) {
    watch::channel(TaskPhase::Idle)
}
