// Command-line definition

use annobatch_core::application::worker::constants::{DEFAULT_MAX_RETRIES, DEFAULT_WORKER_COUNT};
use annobatch_core::domain::{JobStatus, TaskStatus};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "~/.annobatch/annobatch.db";
pub const DEFAULT_DATASETS_ROOT: &str = "./datasets";

#[derive(Parser, Debug)]
#[command(name = "annobatch")]
#[command(about = "Durable batch annotation jobs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// SQLite database file (":memory:" for a throwaway store)
    #[arg(long, global = true, env = "ANNOBATCH_DB_PATH", default_value = DEFAULT_DB_PATH)]
    pub db_path: String,

    /// Directory holding one sub-directory of images per dataset
    #[arg(long, global = true, env = "ANNOBATCH_DATASETS_ROOT", default_value = DEFAULT_DATASETS_ROOT)]
    pub datasets_root: String,

    /// Worker count
    #[arg(long, global = true, env = "ANNOBATCH_WORKERS", default_value_t = DEFAULT_WORKER_COUNT)]
    pub workers: usize,

    /// Attempts per task before it is marked failed
    #[arg(long, global = true, env = "ANNOBATCH_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: i32,

    /// Base delay before a failed task is retried (0 = immediately)
    #[arg(long, global = true, env = "ANNOBATCH_RETRY_DELAY_MS", default_value_t = 0)]
    pub retry_delay_ms: u64,

    /// Per-task timeout in seconds
    #[arg(long, global = true, env = "ANNOBATCH_TASK_TIMEOUT_SECS")]
    pub task_timeout_secs: Option<u64>,

    /// In-progress tasks claimed longer ago than this are reclaimed on `serve` startup
    #[arg(long, global = true, env = "ANNOBATCH_RECOVERY_WINDOW_SECS", default_value_t = 300)]
    pub recovery_window_secs: u64,

    /// Annotator command line, invoked as `<command> <image_path>`.
    /// Without it every task succeeds without doing any work.
    #[arg(long, global = true, env = "ANNOBATCH_HANDLER_COMMAND")]
    pub handler_command: Option<String>,

    /// Log output format
    #[arg(long, global = true, env = "ANNOBATCH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Also write daily rolling log files into this directory
    #[arg(long, global = true, env = "ANNOBATCH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a job with one task per image of a dataset
    Create {
        /// Dataset name (sub-directory of the datasets root)
        dataset: String,

        /// Restrict the job to these image IDs (repeatable)
        #[arg(long = "image-id")]
        image_ids: Vec<String>,

        /// Job parameters as a JSON object
        #[arg(long)]
        config: Option<String>,
    },

    /// Mark a job running; a `serve` process executes it
    Start { job_id: String },

    /// Start a job and process it in the foreground until it finishes
    Run { job_id: String },

    /// Pause a running job
    Pause { job_id: String },

    /// Cancel a job; pending tasks are skipped
    Cancel { job_id: String },

    /// Show one job
    Status { job_id: String },

    /// List jobs
    List {
        #[arg(long, value_parser = parse_job_status)]
        status: Option<JobStatus>,
    },

    /// List the tasks of a job
    Tasks {
        job_id: String,

        #[arg(long, value_parser = parse_task_status)]
        status: Option<TaskStatus>,
    },

    /// Delete a job and its tasks
    Delete { job_id: String },

    /// Recover interrupted work and process running jobs until Ctrl+C
    Serve,
}

fn parse_job_status(s: &str) -> Result<JobStatus, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_task_status(s: &str) -> Result<TaskStatus, String> {
    s.parse().map_err(|e| format!("{}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create_with_filters() {
        let cli = Cli::try_parse_from([
            "annobatch",
            "--workers",
            "2",
            "create",
            "animals",
            "--image-id",
            "cat",
            "--image-id",
            "dog",
            "--config",
            "{\"model\":\"v1\"}",
        ])
        .unwrap();

        assert_eq!(cli.global.workers, 2);
        match cli.command {
            Commands::Create {
                dataset,
                image_ids,
                config,
            } => {
                assert_eq!(dataset, "animals");
                assert_eq!(image_ids, vec!["cat", "dog"]);
                assert_eq!(config.as_deref(), Some("{\"model\":\"v1\"}"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_status_filter() {
        let cli = Cli::try_parse_from(["annobatch", "list", "--status", "paused"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List {
                status: Some(JobStatus::Paused)
            }
        ));

        assert!(Cli::try_parse_from(["annobatch", "list", "--status", "sleeping"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["annobatch", "serve", "--log-format", "json", "--max-retries", "5"])
                .unwrap();
        assert_eq!(cli.global.log_format, LogFormat::Json);
        assert_eq!(cli.global.max_retries, 5);
    }
}
