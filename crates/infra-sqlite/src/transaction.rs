// SQLite Transaction Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use annobatch_core::domain::{Job, Task};
use annobatch_core::error::Result;
use annobatch_core::port::{JobStoreTransaction, Transaction};
use sqlx::{Sqlite, Transaction as SqlxTransaction};

pub struct SqliteJobTransaction<'a> {
    tx: SqlxTransaction<'a, Sqlite>,
}

impl<'a> SqliteJobTransaction<'a> {
    pub fn new(tx: SqlxTransaction<'a, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteJobTransaction<'_> {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl JobStoreTransaction for SqliteJobTransaction<'_> {
    async fn insert_job(&mut self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, dataset_name, status,
                total_tasks, completed_tasks, failed_tasks,
                created_at, started_at, completed_at, paused_at,
                error_message, config
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.dataset_name)
        .bind(job.status.as_str())
        .bind(job.total_tasks)
        .bind(job.completed_tasks)
        .bind(job.failed_tasks)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.paused_at)
        .bind(&job.error_message)
        .bind(job.config.as_value().to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn insert_task(&mut self, task: &Task) -> Result<()> {
        let result = task.result.as_ref().map(|r| r.to_string());

        sqlx::query(
            r#"
            INSERT INTO tasks (
                task_id, job_id, image_id, image_path, status, attempts,
                error_message, started_at, completed_at, result
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.job_id)
        .bind(&task.image_id)
        .bind(&task.image_path)
        .bind(task.status.as_str())
        .bind(task.attempts)
        .bind(&task.error_message)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&result)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
