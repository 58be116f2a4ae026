//! Pause, resume and cancel scenarios
//!
//! Handlers are held at a semaphore gate so the scenario controls exactly
//! how many tasks finish before the command is issued.

mod common;

use annobatch_core::domain::{JobStatus, TaskStatus};
use annobatch_core::port::task_handler::mocks::MockTaskHandler;
use annobatch_core::{AppError, CreateJobRequest, JobManagerConfig};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

fn single_worker() -> JobManagerConfig {
    JobManagerConfig {
        worker_count: 1,
        ..fast_config()
    }
}

/// Scenario: 10 tasks, pause after 3 complete, resume, all 10 complete
#[tokio::test]
async fn test_pause_resume_preserves_completed_work() {
    let store = memory_store().await;
    let gate = Arc::new(Semaphore::new(3));
    let handler = Arc::new(MockTaskHandler::new_success().with_gate(gate.clone()));
    let manager = manager(store.clone(), handler.clone(), single_worker());

    let job = manager
        .create_job(CreateJobRequest::new("numbers"))
        .await
        .unwrap();
    assert_eq!(job.total_tasks, 10);
    manager.start_job(&job.job_id).await.unwrap();

    // Three tasks done, the fourth is waiting at the gate
    eventually("3 completed tasks", || async {
        handler.call_count() == 4 && counts(&store, &job.job_id).await.completed == 3
    })
    .await;

    let paused = manager.pause_job(&job.job_id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.completed_tasks, 3);
    assert!(paused.paused_at.is_some());
    assert_eq!(manager.queue_len(), 0);

    // Nothing moves while paused, across several monitor intervals
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let job = manager.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(counts(&store, &job.job_id).await.completed, 3);
        assert_eq!(handler.call_count(), 4);
    }

    gate.add_permits(10);
    let resumed = manager.start_job(&job.job_id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Running);
    assert!(resumed.paused_at.is_none());

    let done = manager
        .wait_for_terminal(&job.job_id, Some(WAIT))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.completed_tasks, 10);
    assert_counter_invariant(&store, &done).await;

    // Completed tasks were never re-run
    for i in 0..10 {
        assert_eq!(handler.calls_for(&format!("n{}", i)), 1, "n{} ran twice", i);
    }

    manager.shutdown().await;
    println!("✅ pause/resume: 3 kept, 10 completed");
}

/// Cancel: pending tasks are skipped, completed ones stay completed
#[tokio::test]
async fn test_cancel_skips_pending_and_keeps_completed() {
    let store = memory_store().await;
    let gate = Arc::new(Semaphore::new(2));
    let handler = Arc::new(MockTaskHandler::new_success().with_gate(gate.clone()));
    let manager = manager(store.clone(), handler.clone(), single_worker());

    let job = manager
        .create_job(CreateJobRequest::new("animals"))
        .await
        .unwrap();
    manager.start_job(&job.job_id).await.unwrap();

    eventually("2 completed tasks", || async {
        handler.call_count() == 3 && counts(&store, &job.job_id).await.completed == 2
    })
    .await;

    let cancelled = manager.cancel_job(&job.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert_eq!(cancelled.completed_tasks, 2);

    let snapshot = counts(&store, &job.job_id).await;
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.in_progress, 1);
    assert_eq!(snapshot.skipped, 2);
    assert_eq!(snapshot.pending, 0);

    // The in-flight call finishes; nothing else is picked up
    gate.add_permits(10);
    eventually("in-flight task to settle", || async {
        counts(&store, &job.job_id).await.in_progress == 0
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The late outcome is reflected in the cancelled job's counters
    let after = manager.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);
    assert_eq!(after.completed_at, cancelled.completed_at);
    assert_eq!(after.completed_tasks, 3);
    assert_counter_invariant(&store, &after).await;
    assert_eq!(handler.call_count(), 3);

    let skipped = manager
        .get_tasks(&job.job_id, Some(TaskStatus::Skipped))
        .await
        .unwrap();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.iter().all(|t| t.attempts == 0));

    // Idempotent, and the job cannot be restarted
    let again = manager.cancel_job(&job.job_id).await.unwrap();
    assert_eq!(again.completed_at, cancelled.completed_at);
    assert!(manager
        .start_job(&job.job_id)
        .await
        .unwrap_err()
        .is_invalid_transition());

    manager.shutdown().await;
}

/// Cancelling a paused job skips everything that was left
#[tokio::test]
async fn test_cancel_paused_job() {
    let store = memory_store().await;
    let gate = Arc::new(Semaphore::new(1));
    let handler = Arc::new(MockTaskHandler::new_success().with_gate(gate.clone()));
    let manager = manager(store.clone(), handler.clone(), single_worker());

    let job = manager
        .create_job(CreateJobRequest::new("animals"))
        .await
        .unwrap();
    manager.start_job(&job.job_id).await.unwrap();
    eventually("1 completed task", || async {
        handler.call_count() == 2 && counts(&store, &job.job_id).await.completed == 1
    })
    .await;

    manager.pause_job(&job.job_id).await.unwrap();
    gate.add_permits(10);
    eventually("in-flight task to settle", || async {
        counts(&store, &job.job_id).await.in_progress == 0
    })
    .await;

    let cancelled = manager.cancel_job(&job.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let snapshot = counts(&store, &job.job_id).await;
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.skipped, 3);
    assert_eq!(cancelled.completed_tasks, 2);

    manager.shutdown().await;
}

/// Resuming a failed job retries only the tasks that still have attempts left
#[tokio::test]
async fn test_resume_failed_job_without_retry_budget_fails_again() {
    let store = memory_store().await;
    let handler = Arc::new(MockTaskHandler::failing_for(["p1"]));
    let manager = manager(store.clone(), handler.clone(), fast_config());

    let job = manager
        .create_job(CreateJobRequest::new("animals").with_image_ids(["p0", "p1"]))
        .await
        .unwrap();
    manager.start_job(&job.job_id).await.unwrap();
    let failed = manager
        .wait_for_terminal(&job.job_id, Some(WAIT))
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);

    // p1 already used all its attempts, so the resumed job fails again
    let resumed = manager.start_job(&job.job_id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Running);
    let refailed = manager
        .wait_for_terminal(&job.job_id, Some(WAIT))
        .await
        .unwrap();
    assert_eq!(refailed.status, JobStatus::Failed);
    assert_eq!(refailed.failed_tasks, 1);
    assert_eq!(handler.calls_for("p1"), 3);
    assert_eq!(handler.calls_for("p0"), 1);

    manager.shutdown().await;
}

/// Running jobs cannot be deleted; paused ones can
#[tokio::test]
async fn test_delete_requires_non_running_job() {
    let store = memory_store().await;
    let gate = Arc::new(Semaphore::new(0));
    let handler = Arc::new(MockTaskHandler::new_success().with_gate(gate.clone()));
    let manager = manager(store.clone(), handler.clone(), single_worker());

    let job = manager
        .create_job(CreateJobRequest::new("animals"))
        .await
        .unwrap();
    manager.start_job(&job.job_id).await.unwrap();

    let err = manager.delete_job(&job.job_id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    manager.pause_job(&job.job_id).await.unwrap();
    gate.add_permits(10);
    eventually("in-flight task to settle", || async {
        counts(&store, &job.job_id).await.in_progress == 0
    })
    .await;

    manager.delete_job(&job.job_id).await.unwrap();
    assert!(manager.get_job(&job.job_id).await.unwrap().is_none());
    assert!(matches!(
        manager.get_tasks(&job.job_id, None).await,
        Err(AppError::NotFound(_))
    ));

    manager.shutdown().await;
}
