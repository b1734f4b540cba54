//! Shared configuration types for the replicator.

mod base;
mod batch;
mod controls;
mod destination;
mod replicator;
mod retry;
mod source;
mod task;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use controls::ControlsConfig;
pub use destination::{ElasticsearchConfig, IndexConfig};
pub use replicator::ReplicatorConfig;
pub use retry::TailRetryConfig;
pub use source::{MongoClientOptionsConfig, MongoConfig};
pub use task::{
    CheckpointConfig, CheckpointPhase, CheckpointTime, ExtractConfig, LoadConfig, MAX_OBJECT_ID,
    TaskConfig, TransformConfig,
};
