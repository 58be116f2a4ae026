// Job Store Port (Interface)

use crate::domain::{Job, JobStatus, Task, TaskCounts, TaskStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Durable storage for Job and Task records
///
/// Every state change is a conditional write: it only applies when the record
/// is still in the expected status, and reports whether it applied. Job and
/// task creation goes through [`crate::port::TransactionalJobStore`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Find job by ID
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// List jobs, optionally filtered by status (oldest first)
    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>>;

    /// Rewrite the whole job record if its stored status is still `expected`
    async fn update_job_if(&self, job: &Job, expected: JobStatus) -> Result<bool>;

    /// Refresh counters of a non-terminal job
    async fn update_job_counters(&self, job_id: &str, completed: i64, failed: i64) -> Result<()>;

    /// Skip all pending tasks and cancel the job in one transaction.
    /// Terminal jobs are left untouched. Returns the stored job afterwards.
    async fn cancel_job(&self, job_id: &str, now_millis: i64) -> Result<Option<Job>>;

    /// Delete a job and all of its tasks
    async fn delete_job(&self, job_id: &str) -> Result<bool>;

    /// Find task by ID
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    /// List tasks of a job in creation order, optionally filtered by status
    async fn list_tasks(&self, job_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>>;

    /// Count tasks of a job per status
    async fn count_tasks(&self, job_id: &str) -> Result<TaskCounts>;

    /// Atomically move a pending task to in_progress and bump its attempts
    async fn claim_task(&self, task_id: &str, now_millis: i64) -> Result<Option<Task>>;

    /// in_progress -> completed with the handler result.
    /// Counters of an already cancelled owning job follow the outcome.
    async fn complete_task(
        &self,
        task_id: &str,
        result: &serde_json::Value,
        now_millis: i64,
    ) -> Result<bool>;

    /// in_progress -> failed (retries exhausted); same counter rule as `complete_task`
    async fn fail_task(&self, task_id: &str, error: &str, now_millis: i64) -> Result<bool>;

    /// in_progress -> pending, keeping the failure reason for the next attempt
    async fn release_task(&self, task_id: &str, error: &str) -> Result<bool>;

    /// Return tasks orphaned in in_progress (process crash) to pending.
    /// Only tasks claimed at or before `claimed_before` (epoch ms) are touched,
    /// so work a live process claimed recently is left alone.
    /// The interrupted attempt is not counted.
    async fn reset_in_progress_tasks(&self, claimed_before: i64) -> Result<u64>;

    /// failed -> pending for tasks of a job that still have attempts left
    async fn reset_failed_tasks(&self, job_id: &str, max_retries: i32) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::{JobStoreTransaction, Transaction, TransactionalJobStore};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    #[derive(Default)]
    struct State {
        jobs: Vec<Job>,
        tasks: Vec<Task>,
    }

    impl State {
        fn job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
            self.jobs.iter_mut().find(|j| j.job_id == job_id)
        }

        fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
            self.tasks.iter_mut().find(|t| t.task_id == task_id)
        }

        fn job_status(&self, job_id: &str) -> Option<JobStatus> {
            self.jobs.iter().find(|j| j.job_id == job_id).map(|j| j.status)
        }

        fn counts(&self, job_id: &str) -> TaskCounts {
            let mut counts = TaskCounts::default();
            for task in self.tasks.iter().filter(|t| t.job_id == job_id) {
                counts.add(task.status, 1);
            }
            counts
        }

        /// Task outcomes recorded after a cancel still show up in its counters
        fn sync_cancelled_counters(&mut self, task_id: &str) {
            let Some(job_id) = self
                .tasks
                .iter()
                .find(|t| t.task_id == task_id)
                .map(|t| t.job_id.clone())
            else {
                return;
            };
            if self.job_status(&job_id) != Some(JobStatus::Cancelled) {
                return;
            }
            let counts = self.counts(&job_id);
            if let Some(job) = self.job_mut(&job_id) {
                job.apply_counts(&counts);
            }
        }

        /// Status a task takes when it leaves in_progress without finishing
        fn requeue_status(&self, job_id: &str) -> TaskStatus {
            if self.job_status(job_id) == Some(JobStatus::Cancelled) {
                TaskStatus::Skipped
            } else {
                TaskStatus::Pending
            }
        }
    }

    /// In-memory JobStore with the same conditional-write semantics as the SQLite store
    #[derive(Clone, Default)]
    pub struct InMemoryJobStore {
        state: Arc<Mutex<State>>,
        fail_task_inserts_after: Option<usize>,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every transaction fail once it has inserted `n` tasks
        pub fn fail_task_inserts_after(mut self, n: usize) -> Self {
            self.fail_task_inserts_after = Some(n);
            self
        }

        fn lock(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
            Ok(self.lock().jobs.iter().find(|j| j.job_id == job_id).cloned())
        }

        async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
            Ok(self
                .lock()
                .jobs
                .iter()
                .filter(|j| status.map_or(true, |s| j.status == s))
                .cloned()
                .collect())
        }

        async fn update_job_if(&self, job: &Job, expected: JobStatus) -> Result<bool> {
            let mut state = self.lock();
            match state.job_mut(&job.job_id) {
                Some(stored) if stored.status == expected => {
                    *stored = job.clone();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn update_job_counters(&self, job_id: &str, completed: i64, failed: i64) -> Result<()> {
            let mut state = self.lock();
            if let Some(job) = state.job_mut(job_id) {
                if !job.is_terminal() {
                    job.completed_tasks = completed;
                    job.failed_tasks = failed;
                }
            }
            Ok(())
        }

        async fn cancel_job(&self, job_id: &str, now_millis: i64) -> Result<Option<Job>> {
            let mut state = self.lock();
            match state.job_status(job_id) {
                None => return Ok(None),
                Some(status) if status.is_terminal() => {}
                Some(_) => {
                    for task in state.tasks.iter_mut().filter(|t| t.job_id == job_id) {
                        if task.status == TaskStatus::Pending {
                            task.status = TaskStatus::Skipped;
                        }
                    }
                    let counts = state.counts(job_id);
                    if let Some(job) = state.job_mut(job_id) {
                        job.apply_counts(&counts);
                        job.status = JobStatus::Cancelled;
                        job.completed_at = Some(now_millis);
                    }
                }
            }
            Ok(state.jobs.iter().find(|j| j.job_id == job_id).cloned())
        }

        async fn delete_job(&self, job_id: &str) -> Result<bool> {
            let mut state = self.lock();
            let before = state.jobs.len();
            state.jobs.retain(|j| j.job_id != job_id);
            state.tasks.retain(|t| t.job_id != job_id);
            Ok(state.jobs.len() != before)
        }

        async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
            Ok(self.lock().tasks.iter().find(|t| t.task_id == task_id).cloned())
        }

        async fn list_tasks(&self, job_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
            Ok(self
                .lock()
                .tasks
                .iter()
                .filter(|t| t.job_id == job_id && status.map_or(true, |s| t.status == s))
                .cloned()
                .collect())
        }

        async fn count_tasks(&self, job_id: &str) -> Result<TaskCounts> {
            Ok(self.lock().counts(job_id))
        }

        async fn claim_task(&self, task_id: &str, now_millis: i64) -> Result<Option<Task>> {
            let mut state = self.lock();
            match state.task_mut(task_id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    task.status = TaskStatus::InProgress;
                    task.attempts += 1;
                    task.started_at = Some(now_millis);
                    Ok(Some(task.clone()))
                }
                _ => Ok(None),
            }
        }

        async fn complete_task(
            &self,
            task_id: &str,
            result: &serde_json::Value,
            now_millis: i64,
        ) -> Result<bool> {
            let mut state = self.lock();
            match state.task_mut(task_id) {
                Some(task) if task.status == TaskStatus::InProgress => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result.clone());
                    task.error_message = None;
                    task.completed_at = Some(now_millis);
                    state.sync_cancelled_counters(task_id);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn fail_task(&self, task_id: &str, error: &str, now_millis: i64) -> Result<bool> {
            let mut state = self.lock();
            match state.task_mut(task_id) {
                Some(task) if task.status == TaskStatus::InProgress => {
                    task.status = TaskStatus::Failed;
                    task.error_message = Some(error.to_string());
                    task.completed_at = Some(now_millis);
                    state.sync_cancelled_counters(task_id);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn release_task(&self, task_id: &str, error: &str) -> Result<bool> {
            let mut state = self.lock();
            let Some(job_id) = state
                .tasks
                .iter()
                .find(|t| t.task_id == task_id && t.status == TaskStatus::InProgress)
                .map(|t| t.job_id.clone())
            else {
                return Ok(false);
            };
            let next = state.requeue_status(&job_id);
            if let Some(task) = state.task_mut(task_id) {
                task.status = next;
                task.error_message = Some(error.to_string());
            }
            Ok(true)
        }

        async fn reset_in_progress_tasks(&self, claimed_before: i64) -> Result<u64> {
            let mut state = self.lock();
            let orphaned: Vec<(String, String)> = state
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::InProgress)
                .filter(|t| t.started_at.map_or(true, |at| at <= claimed_before))
                .map(|t| (t.task_id.clone(), t.job_id.clone()))
                .collect();
            for (task_id, job_id) in &orphaned {
                let next = state.requeue_status(job_id);
                if let Some(task) = state.task_mut(task_id) {
                    task.status = next;
                    task.attempts = (task.attempts - 1).max(0);
                }
            }
            Ok(orphaned.len() as u64)
        }

        async fn reset_failed_tasks(&self, job_id: &str, max_retries: i32) -> Result<u64> {
            let mut state = self.lock();
            let mut reset = 0;
            for task in state.tasks.iter_mut().filter(|t| t.job_id == job_id) {
                if task.status == TaskStatus::Failed && task.attempts < max_retries {
                    task.status = TaskStatus::Pending;
                    task.completed_at = None;
                    reset += 1;
                }
            }
            Ok(reset)
        }
    }

    /// Buffers inserts and applies them on commit
    struct InMemoryTransaction {
        state: Arc<Mutex<State>>,
        jobs: Vec<Job>,
        tasks: Vec<Task>,
        fail_task_inserts_after: Option<usize>,
    }

    #[async_trait]
    impl TransactionalJobStore for InMemoryJobStore {
        async fn begin_transaction(&self) -> Result<Box<dyn JobStoreTransaction>> {
            Ok(Box::new(InMemoryTransaction {
                state: Arc::clone(&self.state),
                jobs: Vec::new(),
                tasks: Vec::new(),
                fail_task_inserts_after: self.fail_task_inserts_after,
            }))
        }
    }

    #[async_trait]
    impl Transaction for InMemoryTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.jobs.extend(self.jobs);
            state.tasks.extend(self.tasks);
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl JobStoreTransaction for InMemoryTransaction {
        async fn insert_job(&mut self, job: &Job) -> Result<()> {
            self.jobs.push(job.clone());
            Ok(())
        }

        async fn insert_task(&mut self, task: &Task) -> Result<()> {
            if matches!(self.fail_task_inserts_after, Some(n) if self.tasks.len() >= n) {
                return Err(AppError::Database("injected insert failure".to_string()));
            }
            self.tasks.push(task.clone());
            Ok(())
        }
    }
}
