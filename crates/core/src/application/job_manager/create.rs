// Create Job Use Case

use crate::domain::{Job, JobConfig, Task, WorkItem};
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, JobStoreTransaction, TimeProvider, Transaction, TransactionalJobStore, WorkSource,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Create request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub dataset_name: String,

    /// Restrict the job to these images (all images of the dataset when absent)
    #[serde(default)]
    pub image_ids: Option<Vec<String>>,

    /// Opaque job parameters, must be a JSON object
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl CreateJobRequest {
    pub fn new(dataset_name: impl Into<String>) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            ..Self::default()
        }
    }

    pub fn with_image_ids<I, S>(mut self, image_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.image_ids = Some(image_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// Execute create use case (job and tasks in one transaction)
///
/// # Arguments
///
/// * `source` - Work-item source the tasks are derived from
/// * `store` - Transactional job store
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `req` - Create request
pub async fn execute(
    source: &dyn WorkSource,
    store: &dyn TransactionalJobStore,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    req: CreateJobRequest,
) -> Result<Job> {
    if req.dataset_name.trim().is_empty() {
        return Err(AppError::Validation("dataset_name must not be empty".to_string()));
    }
    let config = match req.config {
        Some(value) => JobConfig::new(value)?,
        None => JobConfig::default(),
    };
    let image_ids = req.image_ids.map(dedup_preserving_order);

    // Enumerate before touching the store: a source failure persists nothing
    let items = source
        .enumerate(&req.dataset_name, image_ids.as_deref())
        .await?;

    let job_id = id_provider.generate_id();
    let created_at = time_provider.now_millis();
    let job = Job::new(
        job_id.clone(),
        created_at,
        req.dataset_name,
        items.len() as i64,
        config,
    );

    let mut tx = store.begin_transaction().await?;
    if let Err(e) = insert_all(&mut *tx, &job, &items).await {
        debug!(job_id = %job_id, error = %e, "Rolling back job creation");
        tx.rollback().await?;
        return Err(e);
    }
    tx.commit().await?;

    info!(
        job_id = %job.job_id,
        dataset = %job.dataset_name,
        total_tasks = job.total_tasks,
        "Job created"
    );
    Ok(job)
}

async fn insert_all(
    tx: &mut dyn JobStoreTransaction,
    job: &Job,
    items: &[WorkItem],
) -> Result<()> {
    tx.insert_job(job).await?;
    for item in items {
        tx.insert_task(&Task::new(&job.job_id, item)).await?;
    }
    Ok(())
}

fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobStatus, TaskStatus};
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::ManualTimeProvider;
    use crate::port::work_source::mocks::StaticWorkSource;
    use crate::port::JobStore;

    fn source() -> StaticWorkSource {
        StaticWorkSource::new().with_dataset("animals", ["cat", "dog", "bird"])
    }

    #[tokio::test]
    async fn test_create_persists_job_and_pending_tasks() {
        let store = InMemoryJobStore::new();
        let job = execute(
            &source(),
            &store,
            &SequentialIdProvider::new("job"),
            &ManualTimeProvider::new(1_000),
            CreateJobRequest::new("animals"),
        )
        .await
        .unwrap();

        assert_eq!(job.job_id, "job-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_tasks, 3);
        assert_eq!(job.created_at, 1_000);

        let tasks = store.list_tasks("job-1", None).await.unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
        assert_eq!(tasks[0].task_id, "job-1_cat");
    }

    #[tokio::test]
    async fn test_duplicate_image_ids_are_collapsed() {
        let store = InMemoryJobStore::new();
        let job = execute(
            &source(),
            &store,
            &SequentialIdProvider::new("job"),
            &ManualTimeProvider::new(0),
            CreateJobRequest::new("animals").with_image_ids(["dog", "cat", "dog"]),
        )
        .await
        .unwrap();

        assert_eq!(job.total_tasks, 2);
        let ids: Vec<_> = store
            .list_tasks(&job.job_id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.image_id)
            .collect();
        assert_eq!(ids, vec!["cat", "dog"]);
    }

    #[tokio::test]
    async fn test_unknown_dataset_persists_nothing() {
        let store = InMemoryJobStore::new();
        let err = execute(
            &source(),
            &store,
            &SequentialIdProvider::new("job"),
            &ManualTimeProvider::new(0),
            CreateJobRequest::new("plants"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::SourceNotFound(_)));
        assert!(store.list_jobs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_object_config_is_rejected() {
        let store = InMemoryJobStore::new();
        let err = execute(
            &source(),
            &store,
            &SequentialIdProvider::new("job"),
            &ManualTimeProvider::new(0),
            CreateJobRequest::new("animals").with_config(serde_json::json!([1, 2])),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Domain(_)));
        assert!(store.list_jobs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back() {
        let store = InMemoryJobStore::new().fail_task_inserts_after(1);
        let err = execute(
            &source(),
            &store,
            &SequentialIdProvider::new("job"),
            &ManualTimeProvider::new(0),
            CreateJobRequest::new("animals"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Database(_)));
        assert!(store.get_job("job-1").await.unwrap().is_none());
        assert!(store.list_tasks("job-1", None).await.unwrap().is_empty());
    }
}
