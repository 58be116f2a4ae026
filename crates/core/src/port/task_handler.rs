// Task Handler Port
// Pluggable per-image work (annotation, inference, ...)

use crate::domain::Task;
use async_trait::async_trait;
use thiserror::Error;

/// Handler errors
///
/// Every variant counts as one failed attempt; the worker decides between
/// retrying and failing the task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler timed out after {0}ms")]
    Timeout(u64),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Task Handler trait
///
/// Implementations:
/// - NoopTaskHandler: returns a success marker after a trivial delay
/// - CommandTaskHandler: runs an external annotator program per image
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Process one task and return its opaque result payload
    ///
    /// # Errors
    /// Any `HandlerError`; the call may take arbitrary time.
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, HandlerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Fail for the listed image IDs, succeed for the rest
        FailFor(HashSet<String>),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Mock Task Handler for testing
    pub struct MockTaskHandler {
        behavior: MockBehavior,
        delay: Option<Duration>,
        gate: Option<Arc<Semaphore>>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl MockTaskHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                delay: None,
                gate: None,
                calls: Mutex::new(HashMap::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn failing_for<I, S>(image_ids: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self::new(MockBehavior::FailFor(
                image_ids.into_iter().map(Into::into).collect(),
            ))
        }

        /// Sleep before every outcome
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Every call consumes one permit; calls block while none are left
        pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        /// Total number of handler invocations
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }

        /// Number of invocations for one image
        pub fn calls_for(&self, image_id: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .get(image_id)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl TaskHandler for MockTaskHandler {
        async fn handle(&self, task: &Task) -> Result<serde_json::Value, HandlerError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(task.image_id.clone())
                .or_insert(0) += 1;

            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| HandlerError::Failed(e.to_string()))?
                    .forget();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match &self.behavior {
                MockBehavior::Success => Ok(serde_json::json!({
                    "image_id": task.image_id,
                    "labels": ["mock"],
                })),
                MockBehavior::Fail(msg) => Err(HandlerError::Failed(msg.clone())),
                MockBehavior::FailFor(ids) if ids.contains(&task.image_id) => Err(
                    HandlerError::Failed(format!("cannot annotate {}", task.image_id)),
                ),
                MockBehavior::FailFor(_) => Ok(serde_json::json!({ "image_id": task.image_id })),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
            }
        }
    }
}
