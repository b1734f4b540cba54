use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry behaviour of a task's change-log tail.
///
/// A failed tail is always restarted; these settings only control where the restart begins
/// and how long the task waits between attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TailRetryConfig {
    /// How far before the failure instant the restarted tail begins.
    ///
    /// Entries inside this window may be delivered twice.
    /// Default: 60000ms (60 seconds)
    #[serde(default = "default_rewind_ms")]
    pub rewind_ms: u64,

    /// Delay before the first restart after a failure.
    ///
    /// Default: 1000ms (1 second)
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Upper bound for the delay between consecutive restarts.
    ///
    /// Default: 30000ms (30 seconds)
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Multiplier applied to the delay after each consecutive failure.
    ///
    /// Must be >= 1.0.
    /// Default: 2.0
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_rewind_ms() -> u64 {
    60_000
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for TailRetryConfig {
    fn default() -> Self {
        Self {
            rewind_ms: default_rewind_ms(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl TailRetryConfig {
    /// Returns the rewind window as a Duration.
    pub fn rewind(&self) -> Duration {
        Duration::from_millis(self.rewind_ms)
    }

    /// Returns the initial retry delay as a Duration.
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    /// Returns the maximum retry delay as a Duration.
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "controls.tail_retry.backoff_multiplier".to_string(),
                constraint: "must be a finite number >= 1.0".to_string(),
            });
        }

        if self.initial_retry_delay_ms > self.max_retry_delay_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "controls.tail_retry.initial_retry_delay_ms".to_string(),
                constraint: "must not exceed max_retry_delay_ms".to_string(),
            });
        }

        Ok(())
    }
}
