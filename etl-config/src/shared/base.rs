use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its accepted range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A required string field is empty.
    #[error("`{field}` cannot be empty")]
    EmptyField { field: String },
    /// The checkpoint identifier is not a 24 character hex object id.
    #[error("Task `{task}` has an invalid checkpoint id `{id}`: expected 24 hex characters")]
    InvalidCheckpointId { task: String, id: String },
    /// The checkpoint time is neither epoch milliseconds nor an RFC 3339 timestamp.
    #[error("Task `{task}` has an invalid checkpoint time `{time}`")]
    InvalidCheckpointTime { task: String, time: String },
}
