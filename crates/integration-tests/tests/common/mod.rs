//! Shared fixtures for the end-to-end scenarios
#![allow(dead_code)]

use annobatch_core::domain::{Job, TaskCounts};
use annobatch_core::port::id_provider::SequentialIdProvider;
use annobatch_core::port::task_handler::mocks::MockTaskHandler;
use annobatch_core::port::work_source::mocks::StaticWorkSource;
use annobatch_core::port::JobStore;
use annobatch_core::{JobManager, JobManagerConfig};
use annobatch_infra_sqlite::SqliteJobStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(10);

/// Short intervals so scenarios finish in milliseconds
pub fn fast_config() -> JobManagerConfig {
    JobManagerConfig {
        worker_count: 2,
        max_retries: 3,
        monitor_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(2),
        ..JobManagerConfig::default()
    }
}

pub async fn memory_store() -> Arc<SqliteJobStore> {
    Arc::new(SqliteJobStore::connect("sqlite::memory:").await.unwrap())
}

/// `"animals"` with p0..p4 and `"numbers"` with n0..n9
pub fn datasets() -> StaticWorkSource {
    StaticWorkSource::new()
        .with_dataset("animals", (0..5).map(|i| format!("p{}", i)))
        .with_dataset("numbers", (0..10).map(|i| format!("n{}", i)))
}

pub fn manager(
    store: Arc<SqliteJobStore>,
    handler: Arc<MockTaskHandler>,
    config: JobManagerConfig,
) -> JobManager {
    JobManager::new(store, Arc::new(datasets()), handler, config)
        .unwrap()
        .with_id_provider(Arc::new(SequentialIdProvider::new("job")))
}

/// Poll `check` until it returns true; panics after `WAIT`
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn counts(store: &SqliteJobStore, job_id: &str) -> TaskCounts {
    store.count_tasks(job_id).await.unwrap()
}

/// Counters never exceed the total; a terminal job has no open tasks and
/// its counters match the task rows
pub async fn assert_counter_invariant(store: &SqliteJobStore, job: &Job) {
    assert!(job.completed_tasks + job.failed_tasks <= job.total_tasks);

    let counts = counts(store, &job.job_id).await;
    assert_eq!(counts.total(), job.total_tasks);
    if job.is_terminal() {
        assert_eq!(counts.pending + counts.in_progress, 0);
        assert_eq!(counts.terminal(), job.total_tasks);
        assert_eq!(job.completed_tasks, counts.completed);
        assert_eq!(job.failed_tasks, counts.failed);
    }
}
