// Crash recovery logic
use crate::domain::{JobId, JobStatus};
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::worker::constants::DEFAULT_RECOVERY_WINDOW_MS;

/// What a recovery pass found and repaired
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tasks returned from in_progress to pending
    pub reset_tasks: u64,
    /// Non-terminal jobs whose counters were rewritten from task rows
    pub reconciled_jobs: usize,
    /// Jobs that were `running` when the process stopped
    pub resumable_jobs: Vec<JobId>,
}

/// Crash recovery service
///
/// On startup, repairs state left behind by a process that stopped while
/// tasks were executing. No worker of this process may run while recovery
/// is in progress. Another process sharing the database may, so only claims
/// older than the recovery window are reclaimed.
pub struct RecoveryService {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    recovery_window_ms: i64,
}

impl RecoveryService {
    /// `recovery_window_ms` defaults to 5 minutes
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        recovery_window_ms: Option<i64>,
    ) -> Self {
        Self {
            store,
            time_provider,
            recovery_window_ms: recovery_window_ms.unwrap_or(DEFAULT_RECOVERY_WINDOW_MS),
        }
    }

    /// Recover orphaned work
    ///
    /// Algorithm:
    /// 1. `in_progress` tasks claimed before `now - recovery_window` go back
    ///    to `pending` (attempt not counted)
    /// 2. Counters of pending, running and paused jobs are recomputed
    /// 3. Jobs still marked `running` are reported for re-enqueue
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let cutoff = self
            .time_provider
            .now_millis()
            .saturating_sub(self.recovery_window_ms);
        info!(
            cutoff,
            recovery_window_ms = self.recovery_window_ms,
            "Starting crash recovery"
        );

        let reset_tasks = self.store.reset_in_progress_tasks(cutoff).await?;
        if reset_tasks > 0 {
            warn!(reset_tasks, "Orphaned in_progress tasks returned to pending");
        }

        let mut report = RecoveryReport {
            reset_tasks,
            ..RecoveryReport::default()
        };

        for status in [JobStatus::Pending, JobStatus::Running, JobStatus::Paused] {
            for job in self.store.list_jobs(Some(status)).await? {
                let counts = self.store.count_tasks(&job.job_id).await?;
                if counts.completed != job.completed_tasks || counts.failed != job.failed_tasks {
                    self.store
                        .update_job_counters(&job.job_id, counts.completed, counts.failed)
                        .await?;
                    report.reconciled_jobs += 1;
                }
                if status == JobStatus::Running {
                    report.resumable_jobs.push(job.job_id);
                }
            }
        }

        info!(
            reset_tasks = report.reset_tasks,
            reconciled_jobs = report.reconciled_jobs,
            resumable_jobs = report.resumable_jobs.len(),
            "Crash recovery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobConfig, Task, TaskStatus, WorkItem};
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::ManualTimeProvider;
    use crate::port::{Transaction, TransactionalJobStore};

    async fn seed_running(store: &InMemoryJobStore, images: &[&str]) {
        let mut job = Job::new("job-1", 0, "animals", images.len() as i64, JobConfig::default());
        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert_job(&job).await.unwrap();
        for id in images {
            tx.insert_task(&Task::new("job-1", &WorkItem::new(*id, format!("/{}.jpg", id))))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
        job.start(1).unwrap();
        assert!(store.update_job_if(&job, JobStatus::Pending).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_claims_survive_recovery() {
        let store = InMemoryJobStore::new();
        seed_running(&store, &["cat", "dog"]).await;
        // cat was claimed by a process that died long ago, dog by one still alive
        store.claim_task("job-1_cat", 1_000).await.unwrap();
        store.claim_task("job-1_dog", 100_000).await.unwrap();

        let clock = Arc::new(ManualTimeProvider::new(120_000));
        let service = RecoveryService::new(Arc::new(store.clone()), clock, Some(60_000));
        let report = service.recover().await.unwrap();

        assert_eq!(report.reset_tasks, 1);
        assert_eq!(report.resumable_jobs, vec!["job-1".to_string()]);
        let cat = store.get_task("job-1_cat").await.unwrap().unwrap();
        assert_eq!(cat.status, TaskStatus::Pending);
        assert_eq!(cat.attempts, 0);
        let dog = store.get_task("job-1_dog").await.unwrap().unwrap();
        assert_eq!(dog.status, TaskStatus::InProgress);
        assert_eq!(dog.attempts, 1);
    }

    #[tokio::test]
    async fn test_default_window_keeps_fresh_claims() {
        let store = InMemoryJobStore::new();
        seed_running(&store, &["cat"]).await;
        store.claim_task("job-1_cat", 10_000).await.unwrap();

        let clock = Arc::new(ManualTimeProvider::new(10_000 + DEFAULT_RECOVERY_WINDOW_MS - 1));
        let service = RecoveryService::new(Arc::new(store.clone()), clock.clone(), None);
        assert_eq!(service.recover().await.unwrap().reset_tasks, 0);

        clock.advance(1);
        assert_eq!(service.recover().await.unwrap().reset_tasks, 1);
    }
}
