// Daemon configuration resolved from CLI flags and environment

use crate::cli::GlobalArgs;
use annobatch_core::JobManagerConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MEMORY_DB: &str = ":memory:";

/// Everything the composition root needs to wire the engine
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_url: String,
    pub datasets_root: PathBuf,
    pub handler_command: Option<String>,
    pub manager: JobManagerConfig,
}

impl DaemonConfig {
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let manager = JobManagerConfig {
            worker_count: args.workers,
            max_retries: args.max_retries,
            retry_base_delay_ms: args.retry_delay_ms,
            task_timeout: args.task_timeout_secs.map(Duration::from_secs),
            recovery_window: Duration::from_secs(args.recovery_window_secs),
            ..JobManagerConfig::default()
        };
        manager
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

        let datasets_root = PathBuf::from(shellexpand::tilde(&args.datasets_root).as_ref());
        let handler_command = args
            .handler_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(Self {
            db_url: database_url(&args.db_path)?,
            datasets_root,
            handler_command,
            manager,
        })
    }
}

/// Turn a database path into a sqlx URL, creating the parent directory
pub fn database_url(db_path: &str) -> Result<String> {
    if db_path == MEMORY_DB {
        return Ok("sqlite::memory:".to_string());
    }

    let expanded = shellexpand::tilde(db_path).into_owned();
    let path = Path::new(&expanded);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    Ok(format!("sqlite://{}", expanded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn args(extra: &[&str]) -> GlobalArgs {
        let mut argv = vec!["annobatch"];
        argv.extend_from_slice(extra);
        argv.push("list");
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn test_memory_database_url() {
        assert_eq!(database_url(":memory:").unwrap(), "sqlite::memory:");
    }

    #[test]
    fn test_database_url_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/state/annobatch.db");

        let url = database_url(db.to_str().unwrap()).unwrap();

        assert_eq!(url, format!("sqlite://{}", db.display()));
        assert!(dir.path().join("nested/state").is_dir());
    }

    #[test]
    fn test_from_args_maps_manager_settings() {
        let config = DaemonConfig::from_args(&args(&[
            "--db-path",
            ":memory:",
            "--workers",
            "7",
            "--max-retries",
            "2",
            "--task-timeout-secs",
            "30",
            "--handler-command",
            "  ",
        ]))
        .unwrap();

        assert_eq!(config.manager.worker_count, 7);
        assert_eq!(config.manager.max_retries, 2);
        assert_eq!(config.manager.task_timeout, Some(Duration::from_secs(30)));
        assert!(config.handler_command.is_none());
        assert_eq!(config.manager.recovery_window, Duration::from_secs(300));
    }

    #[test]
    fn test_from_args_rejects_timeout_beyond_recovery_window() {
        let err = DaemonConfig::from_args(&args(&[
            "--db-path",
            ":memory:",
            "--task-timeout-secs",
            "60",
            "--recovery-window-secs",
            "60",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("recovery_window"));
    }

    #[test]
    fn test_from_args_rejects_zero_workers() {
        let err = DaemonConfig::from_args(&args(&["--db-path", ":memory:", "--workers", "0"]))
            .unwrap_err();
        assert!(err.to_string().contains("worker_count"));
    }
}
