use serde::Deserialize;

use crate::shared::{TailRetryConfig, ValidationError};

/// Process-wide tunables shared by every task.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ControlsConfig {
    /// Maximum number of documents a single snapshot scan reads per second.
    ///
    /// An explicit `0` disables read throttling.
    #[serde(default, alias = "mongodbReadCapacity")]
    pub mongodb_read_capacity: Option<u32>,
    /// Maximum number of mutations sent in one bulk request.
    #[serde(default, alias = "elasticsearchBulkSize")]
    pub elasticsearch_bulk_size: Option<usize>,
    /// Suffix appended to every index name, both pre-created and task targets.
    #[serde(default, alias = "indexNameSuffix")]
    pub index_name_suffix: Option<String>,
    #[serde(default, alias = "tailRetry")]
    pub tail_retry: TailRetryConfig,
}

impl ControlsConfig {
    pub const DEFAULT_READ_CAPACITY: u32 = 10_000;

    pub const DEFAULT_BULK_SIZE: usize = 5000;

    pub fn read_capacity(&self) -> u32 {
        self.mongodb_read_capacity.unwrap_or(Self::DEFAULT_READ_CAPACITY)
    }

    pub fn bulk_size(&self) -> usize {
        self.elasticsearch_bulk_size.unwrap_or(Self::DEFAULT_BULK_SIZE)
    }

    pub fn index_name_suffix(&self) -> &str {
        self.index_name_suffix.as_deref().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bulk_size() == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "controls.elasticsearch_bulk_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.tail_retry.validate()
    }
}
