// Terminal rendering of jobs and tasks

use annobatch_core::domain::{Job, Task};
use chrono::{DateTime, Utc};
use colored::Colorize;
use tabled::{Table, Tabled};

const MAX_ERROR_WIDTH: usize = 60;

#[derive(Tabled)]
pub struct JobRow {
    job_id: String,
    dataset: String,
    status: String,
    progress: String,
    completed: i64,
    failed: i64,
    total: i64,
    created: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            dataset: job.dataset_name.clone(),
            status: job.status.to_string(),
            progress: format!("{:.1}%", job.progress()),
            completed: job.completed_tasks,
            failed: job.failed_tasks,
            total: job.total_tasks,
            created: format_millis(Some(job.created_at)),
        }
    }
}

#[derive(Tabled)]
pub struct TaskRow {
    image_id: String,
    status: String,
    attempts: i32,
    completed: String,
    error: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            image_id: task.image_id.clone(),
            status: task.status.to_string(),
            attempts: task.attempts,
            completed: format_millis(task.completed_at),
            error: task
                .error_message
                .as_deref()
                .map(|e| truncate(e, MAX_ERROR_WIDTH))
                .unwrap_or_default(),
        }
    }
}

pub fn jobs_table(jobs: &[Job]) -> String {
    Table::new(jobs.iter().map(JobRow::from)).to_string()
}

pub fn tasks_table(tasks: &[Task]) -> String {
    Table::new(tasks.iter().map(TaskRow::from)).to_string()
}

/// Detailed view of one job
pub fn print_job(job: &Job) {
    println!("{}", format!("Job {}", job.job_id).bold());
    println!("  {} {}", "Dataset:".bold(), job.dataset_name);
    println!("  {} {}", "Status:".bold(), colored_status(job));
    println!(
        "  {} {}/{} completed, {} failed ({:.1}%)",
        "Progress:".bold(),
        job.completed_tasks,
        job.total_tasks,
        job.failed_tasks,
        job.progress()
    );
    println!("  {} {}", "Created:".bold(), format_millis(Some(job.created_at)));
    println!("  {} {}", "Started:".bold(), format_millis(job.started_at));
    if job.paused_at.is_some() {
        println!("  {} {}", "Paused:".bold(), format_millis(job.paused_at));
    }
    println!("  {} {}", "Finished:".bold(), format_millis(job.completed_at));
    if let Some(error) = &job.error_message {
        println!("  {} {}", "Error:".bold(), error.red());
    }
    println!("  {} {}", "Config:".bold(), job.config.as_value());
}

fn colored_status(job: &Job) -> colored::ColoredString {
    use annobatch_core::domain::JobStatus;

    let label = job.status.as_str();
    match job.status {
        JobStatus::Completed => label.green().bold(),
        JobStatus::Failed => label.red().bold(),
        JobStatus::Cancelled => label.red(),
        JobStatus::Paused => label.yellow(),
        JobStatus::Running => label.cyan(),
        JobStatus::Pending => label.normal(),
    }
}

pub fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}
