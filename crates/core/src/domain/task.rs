// Task Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::job::JobId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Task ID, derived from (job_id, image_id)
pub type TaskId = String;

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "skipped" => Ok(TaskStatus::Skipped),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// One enumerated item of an external dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub image_id: String,
    pub image_path: String,
}

impl WorkItem {
    pub fn new(image_id: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            image_path: image_path.into(),
        }
    }
}

/// Task Entity: one unit of work (one image)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub image_id: String,
    pub image_path: String,
    pub status: TaskStatus,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<serde_json::Value>,
}

impl Task {
    /// Deterministic task ID so re-creating the same (job, image) pair collides
    pub fn task_id_for(job_id: &str, image_id: &str) -> TaskId {
        format!("{}_{}", job_id, image_id)
    }

    pub fn new(job_id: impl Into<String>, item: &WorkItem) -> Self {
        let job_id = job_id.into();
        Self {
            task_id: Self::task_id_for(&job_id, &item.image_id),
            job_id,
            image_id: item.image_id.clone(),
            image_path: item.image_path.clone(),
            status: TaskStatus::Pending,
            attempts: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            task_id: self.task_id.clone(),
            job_id: self.job_id.clone(),
        }
    }
}

/// Lightweight reference to a task waiting in the in-memory queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub job_id: JobId,
}

/// Per-status task counts of one job, read as a single snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus, count: i64) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::InProgress => self.in_progress += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Skipped => self.skipped += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.completed + self.failed + self.skipped
    }

    /// Tasks in completed, failed or skipped
    pub fn terminal(&self) -> i64 {
        self.completed + self.failed + self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_is_deterministic() {
        let item = WorkItem::new("p0", "/data/animals/p0.jpg");
        let a = Task::new("job-1", &item);
        let b = Task::new("job-1", &item);
        assert_eq!(a.task_id, b.task_id);
        assert_eq!(a.task_id, "job-1_p0");
        assert_ne!(a.task_id, Task::new("job-2", &item).task_id);
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("job-1", &WorkItem::new("p0", "/p0.jpg"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.handle().job_id, "job-1");
    }

    #[test]
    fn test_in_progress_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(
            "in_progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
    }

    #[test]
    fn test_counts_partition_total() {
        let mut counts = TaskCounts::default();
        counts.add(TaskStatus::Completed, 3);
        counts.add(TaskStatus::Failed, 1);
        counts.add(TaskStatus::Pending, 2);
        counts.add(TaskStatus::Skipped, 1);
        assert_eq!(counts.total(), 7);
        assert_eq!(counts.terminal(), 5);
    }
}
