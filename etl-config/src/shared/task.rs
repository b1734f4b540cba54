use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Hex form of the largest possible object id, used when a scan has no upper bound.
pub const MAX_OBJECT_ID: &str = "FFFFFFFFFFFFFFFFFFFFFFFF";

/// One replication task: a source collection, how to map its documents and where to write them.
///
/// A task is immutable for the whole lifetime of the process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskConfig {
    /// Where the task resumes from.
    pub from: CheckpointConfig,
    pub extract: ExtractConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    pub load: LoadConfig,
}

impl TaskConfig {
    pub fn validate(&self, name: &str) -> Result<(), ValidationError> {
        self.from.validate(name)?;
        self.extract.validate(name)?;
        self.load.validate(name)
    }
}

/// Phase a task starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointPhase {
    /// Snapshot the collection first, then follow the change log.
    Scan,
    /// Only follow the change log.
    Tail,
}

/// Either epoch milliseconds or a textual timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckpointTime {
    Millis(i64),
    Text(String),
}

impl CheckpointTime {
    /// Parses the time as UTC.
    ///
    /// Text is accepted as RFC 3339, a plain `YYYY-MM-DD` date (midnight UTC) or a string of
    /// epoch milliseconds, which is what environment overrides produce.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            CheckpointTime::Millis(millis) => DateTime::from_timestamp_millis(*millis),
            CheckpointTime::Text(text) => {
                let text = text.trim();
                if let Ok(millis) = text.parse::<i64>() {
                    return DateTime::from_timestamp_millis(millis);
                }

                if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
                    return Some(datetime.with_timezone(&Utc));
                }

                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
            }
        }
    }
}

/// The resume point of a task, supplied by the operator.
///
/// It is read once at task start and never written back; progress is reported through logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub phase: CheckpointPhase,
    /// Change-log start time. Defaults to the instant the task starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<CheckpointTime>,
    /// Inclusive upper bound of the snapshot scan, as a hex object id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl CheckpointConfig {
    /// Upper bound of the snapshot scan, falling back to [`MAX_OBJECT_ID`].
    pub fn scan_upper_bound(&self) -> &str {
        self.id.as_deref().unwrap_or(MAX_OBJECT_ID)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.time.as_ref().and_then(CheckpointTime::to_datetime)
    }

    fn validate(&self, task: &str) -> Result<(), ValidationError> {
        if let Some(id) = &self.id {
            let valid = id.len() == 24 && id.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                return Err(ValidationError::InvalidCheckpointId {
                    task: task.to_string(),
                    id: id.clone(),
                });
            }
        }

        if let Some(time) = &self.time {
            if time.to_datetime().is_none() {
                let time = match time {
                    CheckpointTime::Millis(millis) => millis.to_string(),
                    CheckpointTime::Text(text) => text.clone(),
                };
                return Err(ValidationError::InvalidCheckpointTime {
                    task: task.to_string(),
                    time,
                });
            }
        }

        Ok(())
    }
}

/// The source collection of a task and the subset of it to replicate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractConfig {
    pub db: String,
    pub collection: String,
    /// Filter applied to the snapshot scan, in MongoDB extended JSON.
    #[serde(default = "empty_object")]
    pub query: serde_json::Value,
    /// Projection applied to the snapshot scan.
    #[serde(default = "empty_object")]
    pub projection: serde_json::Value,
}

impl ExtractConfig {
    /// The `<db>.<collection>` namespace used by change-log entries.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.db, self.collection)
    }

    fn validate(&self, task: &str) -> Result<(), ValidationError> {
        if self.db.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: format!("tasks.{task}.extract.db"),
            });
        }

        if self.collection.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: format!("tasks.{task}.extract.collection"),
            });
        }

        for (field, value) in [("query", &self.query), ("projection", &self.projection)] {
            if !value.is_object() {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("tasks.{task}.extract.{field}"),
                    constraint: "must be an object".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// How source documents are turned into index documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransformConfig {
    /// Source field holding the parent document id, used for routing.
    #[serde(default)]
    pub parent: Option<String>,
    /// Source field path to target field name. Empty copies every top-level field.
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}

/// Target index of a task and the mapping applied to it at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadConfig {
    pub index: String,
    /// Mapping type, only meaningful on clusters that still support types.
    #[serde(default, rename = "type")]
    pub doc_type: Option<String>,
    /// Mapping body sent with the put-mapping request.
    #[serde(default = "empty_object")]
    pub body: serde_json::Value,
}

impl LoadConfig {
    /// Returns a copy whose index name carries `suffix`.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            index: format!("{}{suffix}", self.index),
            doc_type: self.doc_type.clone(),
            body: self.body.clone(),
        }
    }

    fn validate(&self, task: &str) -> Result<(), ValidationError> {
        if self.index.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: format!("tasks.{task}.load.index"),
            });
        }

        Ok(())
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
