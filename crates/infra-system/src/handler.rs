// Task handler adapters
// reason: tokio::process for async child management

use annobatch_core::domain::Task;
use annobatch_core::port::{HandlerError, TaskHandler};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Environment variables passed through to annotator processes by default
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "TMPDIR"];

/// Upper bound on stderr copied into a task error message
const MAX_STDERR_CHARS: usize = 2000;

/// Handler that does no work and reports success
///
/// Useful for dry runs and for exercising the pipeline end to end.
#[derive(Debug, Clone, Default)]
pub struct NoopTaskHandler {
    delay: Option<Duration>,
}

impl NoopTaskHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TaskHandler for NoopTaskHandler {
    async fn handle(&self, task: &Task) -> Result<Value, HandlerError> {
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        debug!(task_id = %task.task_id, "No-op annotation");
        Ok(json!({"status": "ok"}))
    }
}

/// Runs an external annotator once per image
///
/// Invocation: `<program> <args...> <image_path>` with a cleared environment
/// (allowlisted variables plus `ANNOBATCH_JOB_ID` and `ANNOBATCH_IMAGE_ID`).
/// Stdout is parsed as the JSON result; output that is not JSON is stored as
/// `{"stdout": "<text>"}`. A non-zero exit status fails the attempt. The child
/// is killed if the call is dropped (task timeout, shutdown abort).
#[derive(Debug, Clone)]
pub struct CommandTaskHandler {
    program: String,
    args: Vec<String>,
    env_allowlist: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandTaskHandler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
        }
    }

    /// Build from a whitespace-separated command line; None when it is blank
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = allowlist;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Allowlisted variables of the current process environment
    fn filtered_env(&self) -> Vec<(String, String)> {
        std::env::vars()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .collect()
    }

    fn build_command(&self, task: &Task) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&task.image_path)
            .env_clear()
            .envs(self.filtered_env())
            .env("ANNOBATCH_JOB_ID", &task.job_id)
            .env("ANNOBATCH_IMAGE_ID", &task.image_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Interpret annotator stdout as the task result
fn parse_output(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if !trimmed.is_empty() => value,
        _ => json!({ "stdout": trimmed }),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl TaskHandler for CommandTaskHandler {
    async fn handle(&self, task: &Task) -> Result<Value, HandlerError> {
        debug!(
            task_id = %task.task_id,
            program = %self.program,
            image_path = %task.image_path,
            "Starting annotator process"
        );

        let output = self
            .build_command(task)
            .spawn()
            .map_err(|e| HandlerError::Io(format!("failed to spawn {}: {}", self.program, e)))?
            .wait_with_output()
            .await
            .map_err(|e| HandlerError::Io(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(HandlerError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                code,
                truncate(stderr.trim(), MAX_STDERR_CHARS)
            )));
        }

        info!(task_id = %task.task_id, "Annotator process completed");
        Ok(parse_output(&output.stdout))
    }
}
