// Application Layer - Use Cases and Business Logic

pub mod config;
pub mod job_manager;
pub mod monitor;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod worker;

// Re-exports
pub use config::JobManagerConfig;
pub use job_manager::{CreateJobRequest, JobManager};
pub use monitor::{ActiveJobs, Monitor};
pub use queue::TaskQueue;
pub use recovery::{RecoveryReport, RecoveryService};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
