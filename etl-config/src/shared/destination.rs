use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection settings for the Elasticsearch cluster receiving mutations.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid leaking the password.
#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster, e.g. `http://localhost:9200`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Timeout applied to every HTTP request, bulk writes included.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Indices created at startup when missing.
    #[serde(default)]
    pub indices: Vec<IndexConfig>,
}

impl ElasticsearchConfig {
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "elasticsearch.url".to_string(),
            });
        }

        for index in &self.indices {
            if index.index.trim().is_empty() {
                return Err(ValidationError::EmptyField {
                    field: "elasticsearch.indices[].index".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn default_request_timeout_ms() -> u64 {
    ElasticsearchConfig::DEFAULT_REQUEST_TIMEOUT_MS
}

/// An index to create at startup with its creation body (settings and mappings).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexConfig {
    pub index: String,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl IndexConfig {
    /// Returns a copy whose index name carries `suffix`.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            index: format!("{}{suffix}", self.index),
            body: self.body.clone(),
        }
    }
}
