// Job Manager configuration

use crate::application::worker::constants::*;
use crate::error::{AppError, Result};
use std::time::Duration;

/// Runtime parameters of the worker pool, monitor and retry policy
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// Number of workers shared by all jobs
    pub worker_count: usize,
    /// Attempts per task before it is marked failed
    pub max_retries: i32,
    /// Monitor reconciliation period
    pub monitor_interval: Duration,
    /// Bounded wait of a worker on an empty queue
    pub poll_interval: Duration,
    /// Base delay before a failed task is re-enqueued (0 = immediately)
    pub retry_base_delay_ms: u64,
    pub retry_backoff_factor: f64,
    /// Per-task handler timeout (None = wait indefinitely)
    pub task_timeout: Option<Duration>,
    /// How long `shutdown` waits for workers and monitor
    pub shutdown_timeout: Duration,
    /// Minimum age of an in_progress claim before recovery treats it as orphaned
    pub recovery_window: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_backoff_factor: DEFAULT_RETRY_BACKOFF_FACTOR,
            task_timeout: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            recovery_window: Duration::from_millis(DEFAULT_RECOVERY_WINDOW_MS as u64),
        }
    }
}

impl JobManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(AppError::Config("worker_count must be at least 1".to_string()));
        }
        if self.max_retries < 1 {
            return Err(AppError::Config("max_retries must be at least 1".to_string()));
        }
        if self.monitor_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(AppError::Config(
                "monitor_interval and poll_interval must be non-zero".to_string(),
            ));
        }
        if self.retry_backoff_factor.is_nan() || self.retry_backoff_factor < 1.0 {
            return Err(AppError::Config(
                "retry_backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if matches!(self.task_timeout, Some(t) if t.is_zero()) {
            return Err(AppError::Config("task_timeout must be non-zero".to_string()));
        }
        if matches!(self.task_timeout, Some(t) if t >= self.recovery_window) {
            return Err(AppError::Config(
                "task_timeout must be shorter than recovery_window".to_string(),
            ));
        }
        Ok(())
    }

    pub fn recovery_window_ms(&self) -> i64 {
        i64::try_from(self.recovery_window.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = JobManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay_ms, 0);
        assert_eq!(config.recovery_window_ms(), 5 * 60 * 1000);
    }

    #[test]
    fn test_rejects_timeout_outliving_recovery_window() {
        let config = JobManagerConfig {
            task_timeout: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = JobManagerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_retries() {
        let config = JobManagerConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_nan_backoff() {
        let config = JobManagerConfig {
            retry_backoff_factor: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
