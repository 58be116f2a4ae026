// Job Manager - orchestration facade over store, queue, workers and monitor

pub mod create;

pub use create::CreateJobRequest;

use crate::application::config::JobManagerConfig;
use crate::application::monitor::{ActiveJobs, Monitor};
use crate::application::queue::TaskQueue;
use crate::application::recovery::{RecoveryReport, RecoveryService};
use crate::application::retry::RetryPolicy;
use crate::application::worker::{shutdown_channel, ShutdownSender, Worker};
use crate::domain::{Job, JobStatus, Task, TaskStatus};
use crate::error::{AppError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{
    IdProvider, JobStore, TaskHandler, TimeProvider, TransactionalJobStore, WorkSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Background loops started on first use
struct PoolRuntime {
    shutdown: ShutdownSender,
    handles: Vec<JoinHandle<()>>,
}

impl PoolRuntime {
    fn is_alive(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }
}

/// Job Manager
///
/// Creates jobs from a work-item source and drives their lifecycle. Workers
/// and the monitor are started lazily by `start_job` / `recover` and stopped
/// by `shutdown`.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    tx_store: Arc<dyn TransactionalJobStore>,
    source: Arc<dyn WorkSource>,
    handler: Arc<dyn TaskHandler>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    config: JobManagerConfig,
    retry_policy: Arc<RetryPolicy>,
    queue: Arc<TaskQueue>,
    active: Arc<ActiveJobs>,
    runtime: Mutex<Option<PoolRuntime>>,
}

impl JobManager {
    pub fn new<S>(
        store: Arc<S>,
        source: Arc<dyn WorkSource>,
        handler: Arc<dyn TaskHandler>,
        config: JobManagerConfig,
    ) -> Result<Self>
    where
        S: JobStore + TransactionalJobStore + 'static,
    {
        config.validate()?;
        let retry_policy = Arc::new(RetryPolicy::new(
            config.max_retries,
            config.retry_base_delay_ms,
            config.retry_backoff_factor,
        ));
        let job_store: Arc<dyn JobStore> = store.clone();
        let tx_store: Arc<dyn TransactionalJobStore> = store;

        Ok(Self {
            store: job_store,
            tx_store,
            source,
            handler,
            id_provider: Arc::new(UuidProvider),
            time_provider: Arc::new(SystemTimeProvider),
            config,
            retry_policy,
            queue: Arc::new(TaskQueue::new()),
            active: Arc::new(ActiveJobs::new()),
            runtime: Mutex::new(None),
        })
    }

    /// Replace the job ID generator (deterministic IDs in tests)
    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = id_provider;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.config
    }

    /// Handles waiting in the shared queue
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Jobs currently reconciled by the monitor
    pub fn active_jobs(&self) -> Vec<String> {
        self.active.snapshot()
    }

    /// Create a job with one pending task per enumerated image
    pub async fn create_job(&self, req: CreateJobRequest) -> Result<Job> {
        create::execute(
            self.source.as_ref(),
            self.tx_store.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            req,
        )
        .await
    }

    /// Start or resume a job
    ///
    /// Starting a running job is a no-op. A failed job gets its failed tasks
    /// with attempts left back to pending before they are enqueued.
    pub async fn start_job(&self, job_id: &str) -> Result<Job> {
        let (job, started) = self.transition_to_running(job_id).await?;
        if !started {
            return Ok(job);
        }

        self.ensure_running().await;
        self.active.insert(job_id);
        let enqueued = self.enqueue_pending(job_id).await?;
        info!(job_id = %job_id, enqueued, "Job scheduled");
        Ok(job)
    }

    /// Persist the start transition without scheduling work in this process
    ///
    /// A manager serving the same store picks the job up through
    /// `adopt_running_jobs` (or `recover` after a restart).
    pub async fn mark_started(&self, job_id: &str) -> Result<Job> {
        let (job, _) = self.transition_to_running(job_id).await?;
        Ok(job)
    }

    /// Schedule `running` jobs this manager does not track yet; returns their IDs
    pub async fn adopt_running_jobs(&self) -> Result<Vec<String>> {
        let mut adopted = Vec::new();
        for job in self.store.list_jobs(Some(JobStatus::Running)).await? {
            if self.active.contains(&job.job_id) {
                continue;
            }
            self.ensure_running().await;
            self.active.insert(&job.job_id);
            let enqueued = self.enqueue_pending(&job.job_id).await?;
            info!(job_id = %job.job_id, enqueued, "Running job adopted");
            adopted.push(job.job_id);
        }
        Ok(adopted)
    }

    /// pending|paused|failed -> running; returns false as second value when
    /// the job was already running
    async fn transition_to_running(&self, job_id: &str) -> Result<(Job, bool)> {
        let mut job = self.require_job(job_id).await?;
        if job.status == JobStatus::Running {
            debug!(job_id = %job_id, "Job already running");
            return Ok((job, false));
        }

        let previous = job.status;
        job.start(self.time_provider.now_millis())?;
        if !self.store.update_job_if(&job, previous).await? {
            // A concurrent start won the swap
            let current = self.require_job(job_id).await?;
            if current.status == JobStatus::Running {
                debug!(job_id = %job_id, "Job started concurrently");
                return Ok((current, false));
            }
            return Err(AppError::Conflict(format!(
                "job {} changed status while starting",
                job_id
            )));
        }

        if previous == JobStatus::Failed {
            let reset = self
                .store
                .reset_failed_tasks(job_id, self.retry_policy.max_retries())
                .await?;
            info!(job_id = %job_id, reset_tasks = reset, "Failed tasks reset for resume");
            self.refresh_counters(&mut job).await?;
        }

        info!(job_id = %job_id, from = %previous, "Job started");
        Ok((job, true))
    }

    /// Pause a running job; in-flight handler calls finish, nothing new is claimed.
    /// Handles of the job still waiting in the queue are dropped; resuming
    /// re-enqueues its pending tasks.
    pub async fn pause_job(&self, job_id: &str) -> Result<Job> {
        let mut job = self.require_job(job_id).await?;
        job.pause(self.time_provider.now_millis())?;
        if !self.store.update_job_if(&job, JobStatus::Running).await? {
            return Err(AppError::Conflict(format!(
                "job {} changed status while pausing",
                job_id
            )));
        }

        self.active.remove(job_id);
        let purged = self.queue.purge_job(job_id);
        self.refresh_counters(&mut job).await?;

        info!(
            job_id = %job_id,
            purged,
            completed = job.completed_tasks,
            "Job paused"
        );
        Ok(job)
    }

    /// Cancel a job: pending tasks are skipped. Terminal jobs are returned unchanged.
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let job = self.require_job(job_id).await?;
        if job.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "Job already terminal");
            return Ok(job);
        }

        let job = self
            .store
            .cancel_job(job_id, self.time_provider.now_millis())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;

        self.active.remove(job_id);
        let purged = self.queue.purge_job(job_id);

        info!(
            job_id = %job_id,
            status = %job.status,
            purged,
            "Job cancelled"
        );
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.store.get_job(job_id).await
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        self.store.list_jobs(status).await
    }

    /// Tasks of a job in creation order
    pub async fn get_tasks(&self, job_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.require_job(job_id).await?;
        self.store.list_tasks(job_id, status).await
    }

    /// Remove a job and its tasks; running jobs must be paused or cancelled first
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let job = self.require_job(job_id).await?;
        if job.status == JobStatus::Running {
            return Err(AppError::Conflict(format!(
                "job {} is running; pause or cancel it first",
                job_id
            )));
        }

        self.queue.purge_job(job_id);
        self.active.remove(job_id);
        if !self.store.delete_job(job_id).await? {
            return Err(AppError::NotFound(format!("job {}", job_id)));
        }
        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Poll the store until the job is terminal (`None` waits indefinitely)
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Option<Duration>) -> Result<Job> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let job = self.require_job(job_id).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            if matches!(deadline, Some(d) if Instant::now() >= d) {
                return Err(AppError::Timeout(format!(
                    "job {} still {} after {:?}",
                    job_id,
                    job.status,
                    timeout.unwrap_or_default()
                )));
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Repair state left by a crashed process and resume jobs that were running
    ///
    /// Must run before any job is started in this process.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        if self.runtime.lock().await.is_some() {
            return Err(AppError::Conflict(
                "recovery must run before workers are started".to_string(),
            ));
        }

        let report = RecoveryService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.time_provider),
            Some(self.config.recovery_window_ms()),
        )
        .recover()
        .await?;

        if !report.resumable_jobs.is_empty() {
            self.ensure_running().await;
        }
        for job_id in &report.resumable_jobs {
            self.active.insert(job_id);
            let enqueued = self.enqueue_pending(job_id).await?;
            info!(job_id = %job_id, enqueued, "Job resumed after recovery");
        }
        Ok(report)
    }

    /// Stop workers and the monitor, waiting up to `shutdown_timeout`
    ///
    /// Jobs keep their persisted status; running jobs resume on `recover`.
    pub async fn shutdown(&self) {
        let Some(runtime) = self.runtime.lock().await.take() else {
            return;
        };

        info!(loops = runtime.handles.len(), "Shutting down job manager");
        runtime.shutdown.shutdown();

        let aborts: Vec<AbortHandle> = runtime.handles.iter().map(|h| h.abort_handle()).collect();
        let joined = tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(runtime.handles),
        )
        .await;

        if joined.is_err() {
            warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Shutdown timed out, aborting remaining loops"
            );
            aborts.iter().for_each(AbortHandle::abort);
        }
        info!("Job manager stopped");
    }

    /// Spawn workers and the monitor unless they are already running
    async fn ensure_running(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.as_ref().is_some_and(PoolRuntime::is_alive) {
            return;
        }

        let (shutdown, _token) = shutdown_channel();
        let mut handles = Vec::with_capacity(self.config.worker_count + 1);

        for id in 0..self.config.worker_count {
            let worker = Worker::new(
                id,
                Arc::clone(&self.queue),
                Arc::clone(&self.store),
                Arc::clone(&self.handler),
                Arc::clone(&self.retry_policy),
                Arc::clone(&self.time_provider),
                self.config.poll_interval,
                self.config.task_timeout,
            );
            let token = shutdown.subscribe();
            handles.push(tokio::spawn(async move { worker.run(token).await }));
        }

        let monitor = Monitor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.active),
            Arc::clone(&self.time_provider),
            self.config.monitor_interval,
        );
        let token = shutdown.subscribe();
        handles.push(tokio::spawn(async move { monitor.run(token).await }));

        info!(workers = self.config.worker_count, "Worker pool started");
        *runtime = Some(PoolRuntime { shutdown, handles });
    }

    async fn enqueue_pending(&self, job_id: &str) -> Result<usize> {
        let pending = self
            .store
            .list_tasks(job_id, Some(TaskStatus::Pending))
            .await?;
        Ok(self.queue.push_all(pending.iter().map(Task::handle)))
    }

    async fn refresh_counters(&self, job: &mut Job) -> Result<()> {
        let counts = self.store.count_tasks(&job.job_id).await?;
        self.store
            .update_job_counters(&job.job_id, counts.completed, counts.failed)
            .await?;
        job.apply_counts(&counts);
        Ok(())
    }

    async fn require_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }
}
