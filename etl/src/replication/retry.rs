//! Retry policy of the change-log tail.
//!
//! A failed tail is never abandoned. Each restart begins a fixed rewind window before the
//! failure instant, so entries written while the cursor was failing are read again rather than
//! lost, and consecutive failures are spaced with capped exponential backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use etl_config::shared::TailRetryConfig;
use rand::Rng;

use crate::error::EtlError;

/// Maximum share of the delay added as random jitter.
const MAX_JITTER: f64 = 0.3;

/// Where the retry loop currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum TailRetryStatus {
    /// The tail is delivering entries.
    Streaming,
    /// The tail failed and will be reopened from `resume_from`.
    Retrying {
        attempt: u32,
        resume_from: DateTime<Utc>,
    },
}

/// Tracks consecutive tail failures.
#[derive(Debug)]
pub struct TailRetryState {
    pub status: TailRetryStatus,
    /// Number of failures since the tail last delivered an entry.
    pub attempt_count: u32,
    pub last_error: Option<EtlError>,
}

impl TailRetryState {
    pub fn new() -> Self {
        Self {
            status: TailRetryStatus::Streaming,
            attempt_count: 0,
            last_error: None,
        }
    }
}

impl Default for TailRetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes restart points and backoff delays for a task's tail.
#[derive(Debug)]
pub struct TailRetryManager {
    config: TailRetryConfig,
    state: TailRetryState,
}

impl TailRetryManager {
    pub fn new(config: TailRetryConfig) -> Self {
        Self {
            config,
            state: TailRetryState::new(),
        }
    }

    pub fn state(&self) -> &TailRetryState {
        &self.state
    }

    pub fn attempt_count(&self) -> u32 {
        self.state.attempt_count
    }

    /// Records a tail failure observed at `failed_at` and returns the restart point.
    pub fn record_failure(&mut self, error: EtlError, failed_at: DateTime<Utc>) -> DateTime<Utc> {
        let rewind = chrono::Duration::from_std(self.config.rewind())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let resume_from = failed_at - rewind;

        self.state.attempt_count += 1;
        self.state.last_error = Some(error);
        self.state.status = TailRetryStatus::Retrying {
            attempt: self.state.attempt_count,
            resume_from,
        };

        resume_from
    }

    /// Records that the tail delivered an entry, which ends the current failure sequence.
    ///
    /// Returns `true` when a failure sequence was actually ended.
    pub fn record_progress(&mut self) -> bool {
        if self.state.attempt_count == 0 {
            return false;
        }

        self.state = TailRetryState::new();

        true
    }

    /// Returns the delay to wait before the next restart.
    ///
    /// The delay is `initial * multiplier^(attempt - 1)`, capped at the maximum, plus up to
    /// 30% of jitter.
    pub fn calculate_backoff(&self) -> Duration {
        let attempt = self.state.attempt_count.saturating_sub(1);
        let multiplier = self
            .config
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let base_delay_ms = self.config.initial_retry_delay_ms as f64 * multiplier;

        let capped_delay_ms = base_delay_ms.min(self.config.max_retry_delay_ms as f64);

        let jitter_factor = rand::thread_rng().r#gen::<f64>() * MAX_JITTER;
        let jittered_delay_ms = capped_delay_ms * (1.0 + jitter_factor);

        Duration::from_millis(jittered_delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn test_config() -> TailRetryConfig {
        TailRetryConfig {
            rewind_ms: 60_000,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }

    fn closed() -> EtlError {
        EtlError::from((ErrorKind::SourceStreamClosed, "cursor closed"))
    }

    #[test]
    fn failure_rewinds_from_the_failure_instant() {
        let mut manager = TailRetryManager::new(test_config());
        let failed_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let resume_from = manager.record_failure(closed(), failed_at);

        assert_eq!(resume_from.timestamp(), 1_700_000_000 - 60);
        assert_eq!(
            manager.state().status,
            TailRetryStatus::Retrying {
                attempt: 1,
                resume_from,
            }
        );
    }

    #[test]
    fn progress_resets_the_failure_sequence() {
        let mut manager = TailRetryManager::new(test_config());

        assert!(!manager.record_progress());

        manager.record_failure(closed(), Utc::now());
        manager.record_failure(closed(), Utc::now());
        assert_eq!(manager.attempt_count(), 2);

        assert!(manager.record_progress());
        assert_eq!(manager.attempt_count(), 0);
        assert_eq!(manager.state().status, TailRetryStatus::Streaming);
        assert!(manager.state().last_error.is_none());
    }

    #[test]
    fn backoff_grows_exponentially() {
        let mut manager = TailRetryManager::new(test_config());

        manager.record_failure(closed(), Utc::now());
        let delay1 = manager.calculate_backoff();
        // 100ms plus up to 30% jitter.
        assert!(delay1.as_millis() >= 100 && delay1.as_millis() <= 130);

        manager.record_failure(closed(), Utc::now());
        let delay2 = manager.calculate_backoff();
        assert!(delay2.as_millis() >= 200 && delay2.as_millis() <= 260);
    }

    #[test]
    fn backoff_is_capped_at_the_max_delay() {
        let config = TailRetryConfig {
            initial_retry_delay_ms: 500,
            backoff_multiplier: 4.0,
            ..test_config()
        };
        let mut manager = TailRetryManager::new(config);

        for _ in 0..10 {
            manager.record_failure(closed(), Utc::now());
        }

        assert!(manager.calculate_backoff().as_millis() <= 1300);
    }

    #[test]
    fn zero_initial_delay_retries_immediately() {
        let config = TailRetryConfig {
            initial_retry_delay_ms: 0,
            ..test_config()
        };
        let mut manager = TailRetryManager::new(config);

        manager.record_failure(closed(), Utc::now());

        assert_eq!(manager.calculate_backoff(), Duration::ZERO);
    }
}
