// Worker - Task execution loop

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::*;
pub use panic_guard::{execute_guarded, GuardedOutcome};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::queue::TaskQueue;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{JobStatus, Task, TaskHandle};
use crate::error::Result;
use crate::port::{HandlerError, JobStore, TaskHandler, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// What happened to a dequeued handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Failed attempt, task re-enqueued after `delay_ms`
    Retrying { delay_ms: u64 },
    Failed,
    /// Owning job is not running; the task stays pending in the store
    JobNotRunning,
    /// Task was no longer pending (duplicate handle, skipped, or already claimed)
    NotClaimed,
}

/// Worker pulls task handles from the shared queue and runs the handler
pub struct Worker {
    id: usize,
    queue: Arc<TaskQueue>,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn TaskHandler>,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    poll_interval: Duration,
    task_timeout: Option<Duration>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        queue: Arc<TaskQueue>,
        store: Arc<dyn JobStore>,
        handler: Arc<dyn TaskHandler>,
        retry_policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
        poll_interval: Duration,
        task_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            queue,
            store,
            handler,
            retry_policy,
            time_provider,
            poll_interval,
            task_timeout,
        }
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// An in-flight handler call is allowed to finish before the loop
    /// observes the shutdown signal.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(worker_id = self.id, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let handle = tokio::select! {
                handle = self.queue.pop(self.poll_interval) => handle,
                _ = shutdown.wait() => {
                    debug!(worker_id = self.id, "Worker interrupted during idle");
                    break;
                }
            };
            let Some(handle) = handle else {
                continue;
            };

            if let Err(e) = self.process(handle.clone()).await {
                error!(
                    worker_id = self.id,
                    task_id = %handle.task_id,
                    error = %e,
                    "Worker error"
                );
                // The task may be stuck in_progress; crash recovery returns it to pending
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => {
                        debug!(worker_id = self.id, "Worker interrupted during error recovery");
                        break;
                    }
                }
            }
        }
        info!(worker_id = self.id, "Worker stopped");
    }

    /// Claim, execute and record one dequeued task
    pub async fn process(&self, handle: TaskHandle) -> Result<TaskOutcome> {
        // Paused, cancelled and finished jobs get no new work
        let job_status = self
            .store
            .get_job(&handle.job_id)
            .await?
            .map(|job| job.status);
        if job_status != Some(JobStatus::Running) {
            debug!(
                task_id = %handle.task_id,
                job_id = %handle.job_id,
                job_status = ?job_status,
                "Dropping task of non-running job"
            );
            return Ok(TaskOutcome::JobNotRunning);
        }

        let now = self.time_provider.now_millis();
        let Some(task) = self.store.claim_task(&handle.task_id, now).await? else {
            debug!(task_id = %handle.task_id, "Task no longer pending, skipping");
            return Ok(TaskOutcome::NotClaimed);
        };

        debug!(
            worker_id = self.id,
            task_id = %task.task_id,
            image_id = %task.image_id,
            attempt = task.attempts,
            "Processing task"
        );

        match self.execute(&task).await {
            Ok(result) => {
                let now = self.time_provider.now_millis();
                self.store.complete_task(&task.task_id, &result, now).await?;
                debug!(task_id = %task.task_id, "Task completed");
                Ok(TaskOutcome::Completed)
            }
            Err(e) => self.handle_failure(&task, e).await,
        }
    }

    async fn handle_failure(&self, task: &Task, err: HandlerError) -> Result<TaskOutcome> {
        let message = err.to_string();
        match self.retry_policy.should_retry(task) {
            RetryDecision::Retry(delay_ms) => {
                info!(
                    task_id = %task.task_id,
                    attempt = task.attempts,
                    delay_ms,
                    error = %message,
                    "Retrying task after failure"
                );
                self.store.release_task(&task.task_id, &message).await?;
                self.requeue(task.handle(), delay_ms);
                Ok(TaskOutcome::Retrying { delay_ms })
            }
            RetryDecision::Failed => {
                warn!(
                    task_id = %task.task_id,
                    attempts = task.attempts,
                    error = %message,
                    "Task failed after max retries"
                );
                let now = self.time_provider.now_millis();
                self.store.fail_task(&task.task_id, &message, now).await?;
                Ok(TaskOutcome::Failed)
            }
        }
    }

    fn requeue(&self, handle: TaskHandle, delay_ms: u64) {
        if delay_ms == 0 {
            self.queue.push(handle);
            return;
        }
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            queue.push(handle);
        });
    }

    /// Invoke the handler on its own task (panic isolation, optional timeout)
    async fn execute(&self, task: &Task) -> std::result::Result<serde_json::Value, HandlerError> {
        let handler = Arc::clone(&self.handler);
        let owned = task.clone();
        let call = async move { handler.handle(&owned).await };

        match execute_guarded(call, self.task_timeout).await {
            GuardedOutcome::Finished(result) => result,
            GuardedOutcome::Panicked(msg) => Err(HandlerError::Panicked(msg)),
            GuardedOutcome::TimedOut(limit) => Err(HandlerError::Timeout(limit.as_millis() as u64)),
        }
    }
}
