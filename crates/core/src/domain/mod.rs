// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod task;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobConfig, JobId, JobStatus};
pub use task::{Task, TaskCounts, TaskHandle, TaskId, TaskStatus, WorkItem};
