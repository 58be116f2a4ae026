//! Annobatch - durable batch annotation jobs
//!
//! Composition root: wires the SQLite store, the dataset directory source
//! and the annotator handler into a `JobManager`, then runs one command.

mod cli;
mod config;
mod logging;
mod output;

use annobatch_core::domain::{Job, JobStatus};
use annobatch_core::port::TaskHandler;
use annobatch_core::{CreateJobRequest, JobManager, VERSION};
use annobatch_infra_sqlite::SqliteJobStore;
use annobatch_infra_system::{CommandTaskHandler, DirectoryWorkSource, NoopTaskHandler};
use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use config::DaemonConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// How often `serve` looks for jobs started by other processes
const ADOPT_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    let _log_guard = logging::init(cli.global.log_format, cli.global.log_dir.as_deref())?;
    info!(version = VERSION, "Annobatch starting");

    // 2. Load configuration
    let config = DaemonConfig::from_args(&cli.global)?;
    info!(db_url = %config.db_url, datasets_root = %config.datasets_root.display(), "Configuration loaded");

    // 3. Initialize database
    let store = Arc::new(
        SqliteJobStore::connect(&config.db_url)
            .await
            .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?,
    );

    // 4. Setup dependencies (DI wiring)
    let source = Arc::new(DirectoryWorkSource::new(config.datasets_root.clone()));
    let handler = build_handler(&config);
    let manager = JobManager::new(store.clone(), source, handler, config.manager.clone())
        .map_err(|e| anyhow::anyhow!("Job manager setup failed: {}", e))?;

    // 5. Dispatch
    let result = dispatch(&manager, cli.command).await;

    // 6. Graceful shutdown
    manager.shutdown().await;
    store.close().await;

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

fn build_handler(config: &DaemonConfig) -> Arc<dyn TaskHandler> {
    match config
        .handler_command
        .as_deref()
        .and_then(CommandTaskHandler::from_command_line)
    {
        Some(handler) => {
            info!(program = handler.program(), "Using command handler");
            Arc::new(handler)
        }
        None => {
            warn!("No handler command configured, tasks succeed without annotation");
            Arc::new(NoopTaskHandler::new())
        }
    }
}

async fn dispatch(manager: &JobManager, command: Commands) -> Result<()> {
    match command {
        Commands::Create {
            dataset,
            image_ids,
            config,
        } => {
            let mut req = CreateJobRequest::new(dataset);
            if !image_ids.is_empty() {
                req = req.with_image_ids(image_ids);
            }
            if let Some(raw) = config {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).context("--config is not valid JSON")?;
                req = req.with_config(value);
            }

            let job = manager.create_job(req).await?;
            println!("{}", "✓ Job created".green().bold());
            println!("{}", output::jobs_table(&[job]));
        }

        Commands::Start { job_id } => {
            let job = manager.mark_started(&job_id).await?;
            println!("{}", format!("✓ Job {} is {}", job.job_id, job.status).green().bold());
            println!("  A running `annobatch serve` process executes its tasks");
        }

        Commands::Run { job_id } => run_job(manager, &job_id).await?,

        Commands::Pause { job_id } => {
            let job = manager.pause_job(&job_id).await?;
            println!(
                "{}",
                format!(
                    "✓ Job {} paused ({}/{} completed)",
                    job.job_id, job.completed_tasks, job.total_tasks
                )
                .yellow()
                .bold()
            );
        }

        Commands::Cancel { job_id } => {
            let job = manager.cancel_job(&job_id).await?;
            if job.status == JobStatus::Cancelled {
                println!("{}", format!("✓ Job {} cancelled", job.job_id).green().bold());
            } else {
                println!(
                    "{}",
                    format!("Job {} already {}", job.job_id, job.status).yellow()
                );
            }
        }

        Commands::Status { job_id } => {
            let job = manager
                .get_job(&job_id)
                .await?
                .with_context(|| format!("Job not found: {}", job_id))?;
            output::print_job(&job);
        }

        Commands::List { status } => {
            let jobs = manager.list_jobs(status).await?;
            if jobs.is_empty() {
                println!("{}", "No jobs".yellow());
            } else {
                println!("{}", output::jobs_table(&jobs));
            }
        }

        Commands::Tasks { job_id, status } => {
            let tasks = manager.get_tasks(&job_id, status).await?;
            if tasks.is_empty() {
                println!("{}", "No tasks".yellow());
            } else {
                println!("{}", output::tasks_table(&tasks));
            }
        }

        Commands::Delete { job_id } => {
            manager.delete_job(&job_id).await?;
            println!("{}", format!("✓ Job {} deleted", job_id).green().bold());
        }

        Commands::Serve => serve(manager).await?,
    }
    Ok(())
}

/// Start a job and process it in this process until it is terminal
async fn run_job(manager: &JobManager, job_id: &str) -> Result<()> {
    let job = manager.start_job(job_id).await?;
    println!(
        "{}",
        format!("▶ Running job {} ({} tasks)", job.job_id, job.total_tasks).cyan()
    );

    let job = tokio::select! {
        job = manager.wait_for_terminal(job_id, None) => job?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(job_id = %job_id, "Shutdown signal received, job stays running");
            println!(
                "{}",
                "Interrupted. Run `annobatch serve` to resume the job.".yellow()
            );
            return Ok(());
        }
    };

    output::print_job(&job);
    finish_status(&job)
}

fn finish_status(job: &Job) -> Result<()> {
    match job.status {
        JobStatus::Completed => Ok(()),
        status => anyhow::bail!("Job {} ended {}", job.job_id, status),
    }
}

/// Recover interrupted work, then execute running jobs until Ctrl+C
async fn serve(manager: &JobManager) -> Result<()> {
    info!("Running crash recovery...");
    let report = manager.recover().await?;
    println!(
        "{}",
        format!(
            "✓ Recovery: {} tasks reset, {} jobs reconciled, {} jobs resumed",
            report.reset_tasks,
            report.reconciled_jobs,
            report.resumable_jobs.len()
        )
        .green()
    );

    info!("System ready, press Ctrl+C to shutdown");

    let mut tick = interval(ADOPT_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                info!("Shutdown signal received. Exiting gracefully...");
                break;
            }
            _ = tick.tick() => {
                match manager.adopt_running_jobs().await {
                    Ok(adopted) => {
                        for job_id in adopted {
                            println!("{}", format!("▶ Picked up job {}", job_id).cyan());
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to adopt running jobs"),
                }
            }
        }
    }
    Ok(())
}
