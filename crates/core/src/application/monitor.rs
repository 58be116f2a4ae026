//! Monitor - reconciles task outcomes into job progress
//!
//! A single background loop. For every active job it recomputes the
//! counters from the store and, once every task is completed or failed,
//! moves the job to its terminal status.

use crate::application::worker::ShutdownToken;
use crate::domain::{JobId, JobStatus};
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Set of jobs the monitor reconciles
#[derive(Default)]
pub struct ActiveJobs {
    jobs: Mutex<HashSet<JobId>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, job_id: &str) -> bool {
        self.lock().insert(job_id.to_string())
    }

    pub fn remove(&self, job_id: &str) -> bool {
        self.lock().remove(job_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains(job_id)
    }

    pub fn snapshot(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Monitor {
    store: Arc<dyn JobStore>,
    active: Arc<ActiveJobs>,
    time_provider: Arc<dyn TimeProvider>,
    interval: Duration,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn JobStore>,
        active: Arc<ActiveJobs>,
        time_provider: Arc<dyn TimeProvider>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            active,
            time_provider,
            interval,
        }
    }

    /// Run the reconciliation loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Monitor started");

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }
            self.reconcile_all().await;
        }

        info!("Monitor stopped");
    }

    /// Reconcile every active job once; returns the jobs that reached a terminal status
    pub async fn reconcile_all(&self) -> Vec<(JobId, JobStatus)> {
        let mut finished = Vec::new();
        for job_id in self.active.snapshot() {
            match self.reconcile(&job_id).await {
                Ok(Some(status)) => finished.push((job_id, status)),
                Ok(None) => {}
                Err(e) => error!(job_id = %job_id, error = %e, "Job reconciliation failed"),
            }
        }
        finished
    }

    /// Refresh counters of one job and finish it when all tasks are done
    ///
    /// The terminal write only applies while the job is still `running`, so a
    /// concurrent pause or cancel wins and terminal jobs never change again.
    pub async fn reconcile(&self, job_id: &str) -> Result<Option<JobStatus>> {
        let Some(mut job) = self.store.get_job(job_id).await? else {
            self.active.remove(job_id);
            return Ok(None);
        };
        if job.status != JobStatus::Running {
            debug!(job_id = %job_id, status = %job.status, "Job no longer running, deregistering");
            self.active.remove(job_id);
            return Ok(None);
        }

        let counts = self.store.count_tasks(job_id).await?;
        if counts.completed + counts.failed < job.total_tasks {
            if counts.completed != job.completed_tasks || counts.failed != job.failed_tasks {
                self.store
                    .update_job_counters(job_id, counts.completed, counts.failed)
                    .await?;
            }
            return Ok(None);
        }

        let now = self.time_provider.now_millis();
        job.finish(&counts, now)?;

        if !self.store.update_job_if(&job, JobStatus::Running).await? {
            debug!(job_id = %job_id, "Job changed status during reconciliation");
            return Ok(None);
        }
        self.active.remove(job_id);

        info!(
            job_id = %job_id,
            status = %job.status,
            completed = job.completed_tasks,
            failed = job.failed_tasks,
            "Job finished"
        );
        Ok(Some(job.status))
    }
}
