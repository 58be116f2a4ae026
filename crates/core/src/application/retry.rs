// Retry logic for failed task attempts
use crate::application::worker::constants::MAX_RETRY_DELAY_MS;
use crate::domain::Task;
use tracing::{debug, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the task after the given delay (ms)
    Retry(u64),
    /// Do not retry, task has failed permanently
    Failed,
}

/// Retry policy
///
/// Determines if a task should be retried based on:
/// - Attempts already made (counted when a worker claims the task)
/// - Maximum attempts allowed
/// - Backoff factor for exponential delay
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: i32,
    base_delay_ms: u64,
    backoff_factor: f64,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `max_retries` - Attempts per task, including the first one
    /// * `base_delay_ms` - Base delay in milliseconds (0 disables backoff)
    /// * `backoff_factor` - Multiplier applied per additional attempt
    pub fn new(max_retries: i32, base_delay_ms: u64, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            backoff_factor,
        }
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Determine if a failed task should be retried
    ///
    /// Returns:
    /// - `RetryDecision::Retry(delay_ms)` if the task gets another attempt
    /// - `RetryDecision::Failed` once `attempts >= max_retries`
    ///
    /// Backoff formula:
    /// delay = base_delay * (backoff_factor ^ (attempts - 1)) * jitter
    pub fn should_retry(&self, task: &Task) -> RetryDecision {
        if task.attempts >= self.max_retries {
            warn!(
                task_id = %task.task_id,
                attempts = %task.attempts,
                max_retries = %self.max_retries,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        if self.base_delay_ms == 0 {
            return RetryDecision::Retry(0);
        }

        let exponent = (task.attempts - 1).max(0);
        let base_delay_ms = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);

        // ±10% jitter seeded by task_id keeps retries of sibling tasks apart
        // while staying deterministic per task
        let jitter_seed = task.task_id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        let delay_ms = ((base_delay_ms * jitter_factor) as u64).min(MAX_RETRY_DELAY_MS);

        debug!(
            task_id = %task.task_id,
            attempt = %task.attempts,
            max_retries = %self.max_retries,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay_ms)
    }
}
