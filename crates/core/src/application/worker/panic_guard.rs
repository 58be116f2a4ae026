// Panic and timeout isolation for handler calls
use std::any::Any;
use std::future::Future;
use std::time::Duration;
use tracing::error;

/// Outcome of a guarded execution
#[derive(Debug)]
pub enum GuardedOutcome<T> {
    /// Execution completed (the output may itself be an error)
    Finished(T),
    /// Execution panicked
    Panicked(String),
    /// Execution exceeded its time limit and was aborted
    TimedOut(Duration),
}

/// Run a future on its own tokio task so a panic cannot take the worker down
///
/// With a `timeout`, the spawned task is aborted once the limit passes. Abort
/// only takes effect at the future's next await point.
pub async fn execute_guarded<F>(future: F, timeout: Option<Duration>) -> GuardedOutcome<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut handle = tokio::spawn(future);

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return GuardedOutcome::TimedOut(limit);
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(output) => GuardedOutcome::Finished(output),
        Err(join_err) if join_err.is_panic() => {
            let panic_msg = panic_message(join_err.into_panic());
            error!(panic_msg = %panic_msg, "Handler panicked");
            GuardedOutcome::Panicked(panic_msg)
        }
        Err(join_err) => GuardedOutcome::Panicked(format!("handler task cancelled: {}", join_err)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_output_is_returned() {
        let outcome = execute_guarded(async { 42 }, None).await;
        assert!(matches!(outcome, GuardedOutcome::Finished(42)));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let outcome = execute_guarded(
            async {
                panic!("annotator exploded");
            },
            None,
        )
        .await;

        match outcome {
            GuardedOutcome::Panicked(msg) => assert_eq!(msg, "annotator exploded"),
            other => panic!("expected panic outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let image = "p3";
        let outcome = execute_guarded(
            async move {
                panic!("bad image {}", image);
            },
            None,
        )
        .await;
        assert!(matches!(outcome, GuardedOutcome::Panicked(msg) if msg == "bad image p3"));
    }

    #[tokio::test]
    async fn test_timeout_aborts_slow_future() {
        let outcome = execute_guarded(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            },
            Some(Duration::from_millis(20)),
        )
        .await;
        assert!(matches!(outcome, GuardedOutcome::TimedOut(_)));
    }
}
