// Worker constants (No magic values)
use std::time::Duration;

/// Default number of workers shared by all jobs
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default attempts per task before it is marked failed
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// How long a worker waits on an empty queue before re-checking shutdown (200ms)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Monitor reconciliation period (1s)
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep duration after a store error before the worker continues (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default retry base delay (0 = requeue immediately)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 0;

/// Default exponential backoff factor
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Upper bound for a single retry delay (5 minutes)
pub const MAX_RETRY_DELAY_MS: u64 = 5 * 60 * 1000;

/// Claims younger than this are assumed to belong to a live process
/// and survive crash recovery (5 minutes)
pub const DEFAULT_RECOVERY_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Graceful shutdown timeout for workers and monitor (5 seconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
