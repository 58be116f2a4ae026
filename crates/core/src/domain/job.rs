// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::task::TaskCounts;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// No automatic transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Job-level parameters, stored for audit and never interpreted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig(serde_json::Value);

impl JobConfig {
    pub fn new(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(DomainError::ValidationError(
                "job config must be a JSON object".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Job Entity: one batch of tasks derived from a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub dataset_name: String,
    pub status: JobStatus,

    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub paused_at: Option<i64>,

    pub error_message: Option<String>,
    pub config: JobConfig,
}

impl Job {
    /// Create a new pending Job
    ///
    /// # Arguments
    ///
    /// * `job_id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `dataset_name` - External dataset the tasks were derived from
    /// * `total_tasks` - Number of tasks created together with the job
    /// * `config` - Opaque job parameters
    pub fn new(
        job_id: impl Into<String>,
        created_at: i64,
        dataset_name: impl Into<String>,
        total_tasks: i64,
        config: JobConfig,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            dataset_name: dataset_name.into(),
            status: JobStatus::Pending,
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            created_at,
            started_at: None,
            completed_at: None,
            paused_at: None,
            error_message: None,
            config,
        }
    }

    /// Completion percentage (0 for an empty job)
    pub fn progress(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.completed_tasks as f64 / self.total_tasks as f64 * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_resume(&self) -> bool {
        matches!(self.status, JobStatus::Paused | JobStatus::Failed)
    }

    /// Transition to Running (first start or resume)
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        match self.status {
            JobStatus::Pending | JobStatus::Paused | JobStatus::Failed => {}
            other => return Err(transition_error(other, JobStatus::Running)),
        }
        self.status = JobStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now_millis);
        }
        self.paused_at = None;
        self.completed_at = None;
        self.error_message = None;
        Ok(())
    }

    /// Transition Running -> Paused
    pub fn pause(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(transition_error(self.status, JobStatus::Paused));
        }
        self.status = JobStatus::Paused;
        self.paused_at = Some(now_millis);
        Ok(())
    }

    /// Copy task-derived counters onto the job
    pub fn apply_counts(&mut self, counts: &TaskCounts) {
        self.completed_tasks = counts.completed;
        self.failed_tasks = counts.failed;
    }

    /// All tasks reached completed/failed
    pub fn all_tasks_finished(&self) -> bool {
        self.completed_tasks + self.failed_tasks == self.total_tasks
    }

    /// Derive the terminal status from task outcomes (Running -> Completed | Failed)
    pub fn finish(&mut self, counts: &TaskCounts, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(transition_error(self.status, JobStatus::Completed));
        }
        self.apply_counts(counts);
        if !self.all_tasks_finished() {
            return Err(DomainError::ValidationError(format!(
                "job {} still has {} unfinished tasks",
                self.job_id,
                self.total_tasks - self.completed_tasks - self.failed_tasks
            )));
        }

        if self.failed_tasks == 0 {
            self.status = JobStatus::Completed;
            self.error_message = None;
        } else {
            self.status = JobStatus::Failed;
            self.error_message = Some(format!("{} tasks failed", self.failed_tasks));
        }
        self.completed_at = Some(now_millis);
        Ok(())
    }
}

fn transition_error(from: JobStatus, to: JobStatus) -> DomainError {
    DomainError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(total: i64) -> Job {
        Job::new("job-1", 1000, "animals", total, JobConfig::default())
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job(5);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress(), 0.0);
        assert!(!job.is_terminal());
        assert!(!job.can_resume());
    }

    #[test]
    fn test_progress_of_empty_job_is_zero() {
        let mut job = job(0);
        job.completed_tasks = 0;
        assert_eq!(job.progress(), 0.0);
    }

    #[test]
    fn test_progress_percentage() {
        let mut job = job(4);
        job.completed_tasks = 1;
        assert_eq!(job.progress(), 25.0);
    }

    #[test]
    fn test_started_at_survives_pause_and_resume() {
        let mut job = job(3);
        job.start(2000).unwrap();
        job.pause(3000).unwrap();
        assert_eq!(job.paused_at, Some(3000));
        assert!(job.can_resume());

        job.start(4000).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(2000));
        assert_eq!(job.paused_at, None);
    }

    #[test]
    fn test_pause_requires_running() {
        let mut job = job(3);
        let err = job.pause(2000).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_terminal_jobs_cannot_start() {
        for status in [JobStatus::Completed, JobStatus::Cancelled] {
            let mut job = job(1);
            job.status = status;
            assert!(job.start(2000).is_err());
        }
    }

    #[test]
    fn test_finish_completed_without_failures() {
        let mut job = job(2);
        job.start(2000).unwrap();
        let counts = TaskCounts {
            completed: 2,
            ..Default::default()
        };
        job.finish(&counts, 5000).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_at, Some(5000));
        assert_eq!(job.progress(), 100.0);
    }

    #[test]
    fn test_finish_failed_with_summary_message() {
        let mut job = job(5);
        job.start(2000).unwrap();
        let counts = TaskCounts {
            completed: 3,
            failed: 2,
            ..Default::default()
        };
        job.finish(&counts, 5000).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("2 tasks failed"));
        assert!(job.can_resume());
    }

    #[test]
    fn test_finish_rejects_unfinished_tasks() {
        let mut job = job(5);
        job.start(2000).unwrap();
        let counts = TaskCounts {
            completed: 3,
            pending: 2,
            ..Default::default()
        };
        assert!(job.finish(&counts, 5000).is_err());
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_resume_from_failed_clears_error() {
        let mut job = job(1);
        job.start(2000).unwrap();
        job.finish(
            &TaskCounts {
                failed: 1,
                ..Default::default()
            },
            3000,
        )
        .unwrap();

        job.start(4000).unwrap();
        assert_eq!(job.error_message, None);
        assert_eq!(job.completed_at, None);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_config_must_be_object() {
        assert!(JobConfig::new(serde_json::json!({"model": "yolo"})).is_ok());
        assert!(JobConfig::new(serde_json::json!([1, 2])).is_err());
    }
}
