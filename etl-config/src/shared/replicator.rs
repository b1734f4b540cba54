use std::collections::BTreeMap;

use serde::Deserialize;

use crate::Config;
use crate::shared::{
    ControlsConfig, ElasticsearchConfig, MongoConfig, TaskConfig, ValidationError,
};

/// Complete configuration for the replicator service.
///
/// Loaded once at startup from the file given on the command line. Tasks are keyed by name;
/// the name is what every log line of the task carries.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    pub mongodb: MongoConfig,
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
    #[serde(default)]
    pub controls: ControlsConfig,
}

impl ReplicatorConfig {
    /// Validates the complete replicator configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.elasticsearch.validate()?;
        self.controls.validate()?;

        for (name, task) in &self.tasks {
            task.validate(name)?;
        }

        Ok(())
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
