// SQLite JobStore Implementation

use crate::error::map_sqlx_error;
use crate::{create_pool, run_migrations, SqliteJobTransaction};
use annobatch_core::domain::{Job, JobConfig, JobStatus, Task, TaskCounts, TaskStatus};
use annobatch_core::error::{AppError, Result};
use annobatch_core::port::{JobStore, JobStoreTransaction, TransactionalJobStore};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

const TERMINAL_JOB_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// Status a task takes when it leaves in_progress without finishing:
/// back to pending, or skipped when its job was cancelled meanwhile
const REQUEUE_STATUS_SQL: &str = r#"
    CASE
        WHEN (SELECT j.status FROM jobs j WHERE j.job_id = tasks.job_id) = 'cancelled'
        THEN 'skipped'
        ELSE 'pending'
    END
"#;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) a database and bring its schema up to date
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Refresh the counters of a cancelled job after one of its in-flight tasks
/// finished. Live jobs are left to the monitor.
async fn sync_cancelled_counters(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    task_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET completed_tasks = (
                SELECT COUNT(*) FROM tasks t
                WHERE t.job_id = jobs.job_id AND t.status = 'completed'
            ),
            failed_tasks = (
                SELECT COUNT(*) FROM tasks t
                WHERE t.job_id = jobs.job_id AND t.status = 'failed'
            )
        WHERE job_id = (SELECT job_id FROM tasks WHERE task_id = ?)
          AND status = 'cancelled'
        "#,
    )
    .bind(task_id)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at ASC, rowid ASC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn update_job_if(&self, job: &Job, expected: JobStatus) -> Result<bool> {
        // Conditional update: only applies while the stored status is still `expected`
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, total_tasks = ?, completed_tasks = ?, failed_tasks = ?,
                started_at = ?, completed_at = ?, paused_at = ?,
                error_message = ?, config = ?
            WHERE job_id = ? AND status = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.total_tasks)
        .bind(job.completed_tasks)
        .bind(job.failed_tasks)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.paused_at)
        .bind(&job.error_message)
        .bind(job.config.as_value().to_string())
        .bind(&job.job_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let applied = result.rows_affected() == 1;
        if !applied {
            debug!(job_id = %job.job_id, expected = %expected, "Conditional job update skipped");
        }
        Ok(applied)
    }

    async fn update_job_counters(&self, job_id: &str, completed: i64, failed: i64) -> Result<()> {
        sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET completed_tasks = ?, failed_tasks = ?
            WHERE job_id = ? AND status NOT IN {}
            "#,
            TERMINAL_JOB_STATUSES
        ))
        .bind(completed)
        .bind(failed)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn cancel_job(&self, job_id: &str, now_millis: i64) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Write first so the transaction holds the write lock from the start
        let skipped = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'skipped'
            WHERE job_id = ? AND status = 'pending'
              AND EXISTS (
                  SELECT 1 FROM jobs WHERE job_id = ? AND status NOT IN {}
              )
            "#,
            TERMINAL_JOB_STATUSES
        ))
        .bind(job_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                completed_at = ?,
                completed_tasks = (
                    SELECT COUNT(*) FROM tasks t
                    WHERE t.job_id = jobs.job_id AND t.status = 'completed'
                ),
                failed_tasks = (
                    SELECT COUNT(*) FROM tasks t
                    WHERE t.job_id = jobs.job_id AND t.status = 'failed'
                )
            WHERE job_id = ? AND status NOT IN {}
            "#,
            TERMINAL_JOB_STATUSES
        ))
        .bind(now_millis)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(job_id = %job_id, skipped, "Pending tasks skipped");
        row.map(JobRow::into_job).transpose()
    }

    async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM tasks WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let deleted = sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(deleted == 1)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn list_tasks(&self, job_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        // rowid follows insertion order, which is the source's enumeration order
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, TaskRow>(
                    "SELECT * FROM tasks WHERE job_id = ? AND status = ? ORDER BY rowid ASC",
                )
                .bind(job_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, TaskRow>(
                    "SELECT * FROM tasks WHERE job_id = ? ORDER BY rowid ASC",
                )
                .bind(job_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn count_tasks(&self, job_id: &str) -> Result<TaskCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks WHERE job_id = ? GROUP BY status")
                .bind(job_id)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut counts = TaskCounts::default();
        for (status, count) in rows {
            counts.add(status.parse()?, count);
        }
        Ok(counts)
    }

    async fn claim_task(&self, task_id: &str, now_millis: i64) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET status = 'in_progress', attempts = attempts + 1, started_at = ?
            WHERE task_id = ? AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn complete_task(
        &self,
        task_id: &str,
        result: &serde_json::Value,
        now_millis: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', result = ?, error_message = NULL, completed_at = ?
            WHERE task_id = ? AND status = 'in_progress'
            "#,
        )
        .bind(result.to_string())
        .bind(now_millis)
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected()
            == 1;

        if done {
            sync_cancelled_counters(&mut tx, task_id).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(done)
    }

    async fn fail_task(&self, task_id: &str, error: &str, now_millis: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', error_message = ?, completed_at = ?
            WHERE task_id = ? AND status = 'in_progress'
            "#,
        )
        .bind(error)
        .bind(now_millis)
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected()
            == 1;

        if done {
            sync_cancelled_counters(&mut tx, task_id).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(done)
    }

    async fn release_task(&self, task_id: &str, error: &str) -> Result<bool> {
        let done = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = {}, error_message = ?
            WHERE task_id = ? AND status = 'in_progress'
            "#,
            REQUEUE_STATUS_SQL
        ))
        .bind(error)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(done.rows_affected() == 1)
    }

    async fn reset_in_progress_tasks(&self, claimed_before: i64) -> Result<u64> {
        let done = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = {}, attempts = MAX(attempts - 1, 0)
            WHERE status = 'in_progress'
              AND (started_at IS NULL OR started_at <= ?)
            "#,
            REQUEUE_STATUS_SQL
        ))
        .bind(claimed_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(done.rows_affected())
    }

    async fn reset_failed_tasks(&self, job_id: &str, max_retries: i32) -> Result<u64> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending', completed_at = NULL
            WHERE job_id = ? AND status = 'failed' AND attempts < ?
            "#,
        )
        .bind(job_id)
        .bind(max_retries)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(done.rows_affected())
    }
}

#[async_trait]
impl TransactionalJobStore for SqliteJobStore {
    async fn begin_transaction(&self) -> Result<Box<dyn JobStoreTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteJobTransaction::new(tx)))
    }
}

/// SQLite row representation of a job
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    job_id: String,
    dataset_name: String,
    status: String,
    total_tasks: i64,
    completed_tasks: i64,
    failed_tasks: i64,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    paused_at: Option<i64>,
    error_message: Option<String>,
    config: String,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status: JobStatus = self.status.parse()?;
        let config = JobConfig::new(serde_json::from_str(&self.config)?)?;

        Ok(Job {
            job_id: self.job_id,
            dataset_name: self.dataset_name,
            status,
            total_tasks: self.total_tasks,
            completed_tasks: self.completed_tasks,
            failed_tasks: self.failed_tasks,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            paused_at: self.paused_at,
            error_message: self.error_message,
            config,
        })
    }
}

/// SQLite row representation of a task
#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    job_id: String,
    image_id: String,
    image_path: String,
    status: String,
    attempts: i32,
    error_message: Option<String>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    result: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let status: TaskStatus = self.status.parse()?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Database(format!("corrupt result of task {}: {}", self.task_id, e)))?;

        Ok(Task {
            task_id: self.task_id,
            job_id: self.job_id,
            image_id: self.image_id,
            image_path: self.image_path,
            status,
            attempts: self.attempts,
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result,
        })
    }
}
