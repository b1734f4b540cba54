use std::time::Duration;
use std::{fmt, sync::Arc};

use tokio::sync::Notify;
use tokio::time::timeout;

use crate::state::task::{TaskPhase, TaskPhaseRx};

/// Default timeout of every wait.
///
/// Chosen empirically, no wait in the test suite should take more than a few seconds.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// A wrapper around [`Arc<Notify>`] that panics when the notification does not arrive in time.
#[derive(Clone)]
pub struct TimedNotify {
    notify: Arc<Notify>,
    timeout_duration: Duration,
}

impl TimedNotify {
    pub fn new(notify: Arc<Notify>) -> Self {
        Self::with_timeout(notify, DEFAULT_NOTIFY_TIMEOUT)
    }

    pub fn with_timeout(notify: Arc<Notify>, timeout_duration: Duration) -> Self {
        Self {
            notify,
            timeout_duration,
        }
    }

    /// Waits for the notification.
    ///
    /// # Panics
    ///
    /// Panics if the timeout elapses first.
    pub async fn notified(&self) {
        if timeout(self.timeout_duration, self.notify.notified())
            .await
            .is_err()
        {
            panic!(
                "Test notification timed out after {:?}. \
                 The expected state was likely never reached.",
                self.timeout_duration
            );
        }
    }
}

impl fmt::Debug for TimedNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedNotify")
            .field("timeout_duration", &self.timeout_duration)
            .finish()
    }
}

/// Waits until the task publishes a phase matching `condition` and returns it.
///
/// # Panics
///
/// Panics if no matching phase is published within [`DEFAULT_NOTIFY_TIMEOUT`] or if the task
/// worker is gone.
pub async fn wait_for_phase<F>(rx: &mut TaskPhaseRx, condition: F) -> TaskPhase
where
    F: FnMut(&TaskPhase) -> bool,
{
    let phase = match timeout(DEFAULT_NOTIFY_TIMEOUT, rx.wait_for(condition)).await {
        Ok(Ok(phase)) => Some(phase.clone()),
        Ok(Err(_)) => panic!("Task worker dropped its phase channel"),
        Err(_) => None,
    };

    match phase {
        Some(phase) => phase,
        None => panic!(
            "Task phase wait timed out after {DEFAULT_NOTIFY_TIMEOUT:?}, last phase was {}",
            *rx.borrow()
        ),
    }
}
