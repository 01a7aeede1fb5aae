use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::error::PipelineError;

/// One failure-report entry. Absence of an entry for a task implies that
/// task succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub file_path: String,
    pub variable_group: String,
    pub error_message: String,
}

/// Work pool sizing and per-task timeout budget.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum tasks in flight at once.
    pub size: usize,
    /// Individual timeout for each task. A timed-out task becomes one
    /// failure-report entry and never cancels siblings.
    pub task_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: (num_cpus::get() * 2).max(2),
            task_timeout: Duration::from_secs(60),
        }
    }
}

/// Bounded worker pool for scan and parse tasks.
///
/// Explicitly constructed and passed by reference, never ambient global
/// state, so independent batches can run with isolated pools in tests.
/// Tasks are pure functions over one file and share no mutable state;
/// the only shared resources are the permit counter and the result
/// channel. Completion order carries no meaning: callers merge results
/// associatively and commutatively.
pub struct WorkPool {
    config: PoolConfig,
    permits: Arc<Semaphore>,
}

impl WorkPool {
    pub fn new(config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.size));
        Self { config, permits }
    }

    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Run one batch of tasks with bounded concurrency and collect every
    /// outcome.
    ///
    /// `label` names each item for the failure report before it is moved
    /// into its task. Individual task errors and timeouts become
    /// `TaskFailure` entries; awaiting the batch itself never fails.
    pub async fn run_batch<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        label: impl Fn(&I) -> (String, String),
        task: F,
    ) -> (Vec<T>, Vec<TaskFailure>)
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let total = items.len();
        debug!("Submitting batch of {} tasks (pool size {})", total, self.size());

        let task = Arc::new(task);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for item in items {
            let (file_path, variable_group) = label(&item);
            let permits = Arc::clone(&self.permits);
            let task = Arc::clone(&task);
            let tx = tx.clone();
            let timeout = self.config.task_timeout;

            tokio::spawn(async move {
                // The semaphore lives as long as the pool; acquire only
                // fails if it is closed, which never happens here.
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };

                let outcome = match tokio::time::timeout(timeout, task(item)).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(TaskFailure {
                        file_path,
                        variable_group,
                        error_message: e.to_string(),
                    }),
                    Err(_) => Err(TaskFailure {
                        file_path,
                        variable_group,
                        error_message: PipelineError::TaskTimeout {
                            seconds: timeout.as_secs(),
                        }
                        .to_string(),
                    }),
                };

                // Send only fails if the batch was abandoned; the result
                // is simply discarded then.
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(value) => successes.push(value),
                Err(failure) => {
                    warn!(
                        "Task failed for {} ({}): {}",
                        failure.file_path, failure.variable_group, failure.error_message
                    );
                    failures.push(failure);
                }
            }
        }

        debug!(
            "Batch complete: {} succeeded, {} failed",
            successes.len(),
            failures.len()
        );
        (successes, failures)
    }
}
