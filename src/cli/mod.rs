//! CLI command definitions for textflow.
//!
//! This module provides the command-line interface for the long-running
//! services (worker, controller) and the operator tooling around them
//! (publish, stats, failed).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::config::{ControllerConfig, DatabaseConfig, RedisConfig, WorkerConfig};
use crate::metrics::init_metrics;
use crate::queue::{SubmitJobMessage, TaskQueue, QUEUE_FAILED, QUEUE_MAIN, QUEUE_PRIORITY};
use crate::scaler::{Autoscaler, LocalWorkload, QueueMetricsCollector};
use crate::storage::{Database, JobFilter, JobRecord, JobStatus, ProcessingType};
use crate::worker::Worker;

/// Queue-backed text-processing job platform.
#[derive(Parser)]
#[command(name = "textflow")]
#[command(about = "Queue-backed text-processing worker and autoscaler")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the job worker until interrupted.
    Worker,

    /// Run the queue-pressure autoscaler until interrupted.
    Controller(ControllerArgs),

    /// Create job rows and publish their queue messages.
    #[command(alias = "pub")]
    Publish(PublishArgs),

    /// Show queue depths, the worker fleet, and job counts by status.
    Stats,

    /// Peek at failed-queue envelopes without consuming them.
    Failed(FailedArgs),
}

/// Arguments for `textflow controller`.
#[derive(Parser, Debug)]
pub struct ControllerArgs {
    /// Name of the managed workload.
    #[arg(long, default_value = "worker")]
    pub workload: String,

    /// Replica count the in-process knob starts at.
    #[arg(long, default_value_t = 1)]
    pub initial_replicas: u32,
}

/// Arguments for `textflow publish`.
#[derive(Parser, Debug)]
pub struct PublishArgs {
    /// Path to the input file.
    #[arg(long)]
    pub file: PathBuf,

    /// Processing type (wordcount, linecount, uppercase, lowercase,
    /// replace, extract).
    #[arg(long = "type")]
    pub processing_type: String,

    /// Number of identical jobs to publish.
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// Publish priority; values above 5 route to the priority queue.
    #[arg(long, default_value_t = 0)]
    pub priority: i64,

    /// Synthetic processing delay in milliseconds (max 60000).
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Transformation parameter as key=value; repeatable.
    #[arg(long = "param", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,
}

/// Arguments for `textflow failed`.
#[derive(Parser, Debug)]
pub struct FailedArgs {
    /// Maximum number of envelopes to show.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// Parses the command line.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the selected subcommand.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Worker => run_worker().await,
        Commands::Controller(args) => run_controller(args).await,
        Commands::Publish(args) => run_publish(args).await,
        Commands::Stats => run_stats().await,
        Commands::Failed(args) => run_failed(args).await,
    }
}

/// Blocks until SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("received shutdown signal");
}

async fn run_worker() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("load worker configuration")?;
    let redis = RedisConfig::from_env();
    let db = DatabaseConfig::from_env().context("load database configuration")?;

    init_metrics().context("initialize metrics")?;

    // A substrate that is unreachable at startup aborts the process; the
    // orchestrator restarts it.
    let database = Database::connect(&db.url).await.context("connect to database")?;
    database.run_migrations().await.context("run migrations")?;
    let queue = TaskQueue::connect(&redis.url).await.context("connect to Redis")?;

    let worker = Arc::new(Worker::new(config, Arc::new(database), Arc::new(queue))?);
    worker.health_check().await.context("startup health check")?;

    let running = tokio::spawn(Arc::clone(&worker).run());
    shutdown_signal().await;
    worker.stop();
    running.await.context("join worker")?;

    info!("worker shutdown complete");
    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let config = ControllerConfig::from_env().context("load controller configuration")?;
    let redis = RedisConfig::from_env();

    init_metrics().context("initialize metrics")?;

    let queue = Arc::new(TaskQueue::connect(&redis.url).await.context("connect to Redis")?);
    let workload = Arc::new(LocalWorkload::new(&args.workload, args.initial_replicas));

    let autoscaler = Autoscaler::new(
        queue.clone(),
        workload,
        config.policy.clone(),
        config.reconcile_interval,
    );
    let collector = QueueMetricsCollector::new(
        queue,
        &args.workload,
        config.metrics_collection_interval,
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    let scaling = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { autoscaler.run(shutdown).await })
    };
    let collecting = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { collector.run(shutdown).await })
    };

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    scaling.await.context("join autoscaler")?;
    collecting.await.context("join metrics collector")?;

    info!("controller shutdown complete");
    Ok(())
}

async fn run_publish(args: PublishArgs) -> anyhow::Result<()> {
    let processing_type: ProcessingType = args
        .processing_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let file_path = args
        .file
        .canonicalize()
        .with_context(|| format!("input file {}", args.file.display()))?;
    let original_filename = file_name(&file_path);

    let parameters: HashMap<String, serde_json::Value> = args
        .params
        .iter()
        .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
        .collect();

    let redis = RedisConfig::from_env();
    let db = DatabaseConfig::from_env().context("load database configuration")?;
    let database = Database::connect(&db.url).await.context("connect to database")?;
    database.run_migrations().await.context("run migrations")?;
    let queue = TaskQueue::connect(&redis.url).await.context("connect to Redis")?;

    for _ in 0..args.count {
        let job_id = Uuid::new_v4();

        let record = JobRecord::new(
            job_id,
            &original_filename,
            file_path.display().to_string(),
            processing_type,
            serde_json::to_value(&parameters)?,
            args.delay_ms as i32,
        );
        database.create_job(&record).await.context("create job row")?;

        let message = SubmitJobMessage::new(
            job_id,
            file_path.display().to_string(),
            processing_type,
        )
        .with_parameters(parameters.clone())
        .with_priority(args.priority)
        .with_delay_ms(args.delay_ms);

        queue.publish(&message).await.context("publish job message")?;
        println!("{job_id}");
    }

    println!(
        "published {} {} job(s) to {}",
        args.count,
        processing_type,
        if args.priority > 5 { QUEUE_PRIORITY } else { QUEUE_MAIN }
    );
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run_stats() -> anyhow::Result<()> {
    let redis = RedisConfig::from_env();
    let queue = TaskQueue::connect(&redis.url).await.context("connect to Redis")?;

    let lengths = queue.all_queue_lengths().await?;
    println!("queues:");
    for name in [QUEUE_MAIN, QUEUE_PRIORITY, QUEUE_FAILED] {
        println!("  {name}: {}", lengths.get(name).copied().unwrap_or(0));
    }

    let workers = queue.active_workers().await?;
    println!("active workers: {}", workers.len());
    for worker_id in &workers {
        println!("  {worker_id}");
    }

    // Job counts are best-effort: stats stays useful when only Redis is up.
    if let Ok(db) = DatabaseConfig::from_env() {
        let database = Database::connect(&db.url).await.context("connect to database")?;
        println!("jobs:");
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            let count = database.count_jobs_by_status(status).await?;
            println!("  {status}: {count}");
        }
        println!("  total: {}", database.count_jobs().await?);

        let recent = database
            .list_jobs(&JobFilter {
                limit: Some(10),
                ..Default::default()
            })
            .await?;
        if !recent.is_empty() {
            println!("recent:");
            for job in recent {
                println!(
                    "  {} {} {} {}",
                    job.id,
                    job.processing_type,
                    job.status,
                    job.worker_id.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}

async fn run_failed(args: FailedArgs) -> anyhow::Result<()> {
    let redis = RedisConfig::from_env();
    let queue = TaskQueue::connect(&redis.url).await.context("connect to Redis")?;

    let envelopes = queue.peek_failed(args.limit).await?;
    if envelopes.is_empty() {
        println!("failed queue is empty");
        return Ok(());
    }

    for envelope in envelopes {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_val_accepts_pairs() {
        assert_eq!(
            parse_key_val("find=old").expect("parse"),
            ("find".to_string(), "old".to_string())
        );
        // Values may contain '='.
        assert_eq!(
            parse_key_val("pattern=a=b").expect("parse"),
            ("pattern".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("no-separator").is_err());
        assert!(parse_key_val("=value").is_err());
    }

    #[test]
    fn cli_parses_publish_command() {
        let cli = Cli::try_parse_from([
            "textflow", "publish", "--file", "/tmp/in.txt", "--type", "replace", "--count", "3",
            "--priority", "7", "--param", "find=a", "--param", "replace_with=b",
        ])
        .expect("parse");

        match cli.command {
            Commands::Publish(args) => {
                assert_eq!(args.count, 3);
                assert_eq!(args.priority, 7);
                assert_eq!(args.params.len(), 2);
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn cli_parses_controller_defaults() {
        let cli = Cli::try_parse_from(["textflow", "controller"]).expect("parse");
        match cli.command {
            Commands::Controller(args) => {
                assert_eq!(args.workload, "worker");
                assert_eq!(args.initial_replicas, 1);
            }
            _ => panic!("expected controller"),
        }
    }
}
