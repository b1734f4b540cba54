use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

/// Pool owning every running task worker.
///
/// Workers are independent: one finishing, failing or panicking never affects the others.
/// Dropping the pool aborts the workers still running.
#[derive(Debug, Clone)]
pub struct TaskWorkerPool {
    join_set: Arc<Mutex<JoinSet<(String, EtlResult<()>)>>>,
}

impl TaskWorkerPool {
    pub fn new() -> Self {
        Self {
            join_set: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Spawns the worker future of task `name`.
    pub async fn spawn<F>(&self, name: String, future: F)
    where
        F: Future<Output = EtlResult<()>> + Send + 'static,
    {
        let mut join_set = self.join_set.lock().await;
        debug!(task = %name, "spawning task worker");
        join_set.spawn(async move {
            let result = future.await;
            (name, result)
        });
    }

    /// Number of workers that were spawned and not yet collected.
    pub async fn len(&self) -> usize {
        self.join_set.lock().await.len()
    }

    /// Waits for every worker to finish and folds their failures into one error.
    pub async fn wait_all(&self) -> EtlResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut join_set = self.join_set.lock().await;
                join_set.join_next().await
            };

            let Some(result) = result else {
                break;
            };

            match result {
                Ok((name, Ok(()))) => {
                    info!(task = %name, "task worker finished");
                }
                Ok((name, Err(err))) => {
                    error!(task = %name, error = %err, "task worker failed");
                    errors.push(err);
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        errors.push(etl_error!(
                            ErrorKind::TaskWorkerCancelled,
                            "Task worker was cancelled",
                            join_err
                        ));
                    } else {
                        errors.push(etl_error!(
                            ErrorKind::TaskWorkerPanic,
                            "Task worker panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Default for TaskWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;

    #[tokio::test]
    async fn failures_and_panics_are_collected_without_stopping_siblings() {
        let pool = TaskWorkerPool::new();

        pool.spawn("ok".to_string(), async { Ok(()) }).await;
        pool.spawn("failing".to_string(), async {
            bail!(ErrorKind::InvalidState, "task gave up")
        })
        .await;
        pool.spawn("panicking".to_string(), async { panic!("boom") })
            .await;

        let err = pool.wait_all().await.unwrap_err();

        let mut kinds = err.kinds();
        kinds.sort_by_key(|kind| format!("{kind:?}"));
        assert_eq!(kinds, vec![ErrorKind::InvalidState, ErrorKind::TaskWorkerPanic]);
        assert_eq!(pool.len().await, 0);
    }
}
