//! Coursepipe CLI — worker process and operator tooling.
//!
//! Configuration comes from the environment (a `.env` file is honored);
//! `DATABASE_URL` is required for every command.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;

use coursepipe_cli::init_tracing;
use coursepipe_core::config::Config;
use coursepipe_core::models::{JobQueue, WebhookEventPayload};
use coursepipe_db::{Database, MediaAssetRepository, PgJobStore};
use coursepipe_reconcile::{PgCatalog, StorageReconciler};
use coursepipe_storage::{MemoryStorageGateway, S3StorageGateway, StorageGateway};
use coursepipe_worker::{
    CommandTranscoder, EventDispatcher, JobWorker, JobWorkerConfig, TranscodeHandler,
    WebhookDeliveryHandler,
};

#[derive(Parser)]
#[command(name = "coursepipe", about = "Coursepipe media pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the queue workers until interrupted
    Worker,
    /// Audit catalog metadata against object storage
    Reconcile {
        /// Persist proposed catalog rewrites (default is a dry-run report)
        #[arg(long)]
        apply: bool,
        /// Rows per apply transaction
        #[arg(long)]
        batch_size: Option<usize>,
        /// Write the JSON report to a file instead of stdout
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },
    /// Job queue operator commands
    Jobs {
        #[command(subcommand)]
        sub: JobCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Show queue counts
    Stats {
        /// Restrict to one queue: webhook_delivery or media_transcode
        #[arg(long)]
        queue: Option<String>,
    },
    /// Reset a failed job to pending with a fresh attempt budget
    Retry {
        /// Job UUID
        id: String,
    },
}

/// Placeholder internal consumer: logs events until the course platform's
/// enrollment and payment handlers are wired in.
struct LoggingEventDispatcher;

#[async_trait::async_trait]
impl EventDispatcher for LoggingEventDispatcher {
    async fn dispatch(&self, event: &WebhookEventPayload) -> Result<()> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "Webhook event delivered"
        );
        Ok(())
    }
}

fn build_storage(config: &Config) -> Arc<dyn StorageGateway> {
    match config.storage.backend.as_str() {
        "memory" => Arc::new(MemoryStorageGateway::new()),
        _ => Arc::new(S3StorageGateway::new(
            config
                .storage
                .s3_region
                .clone()
                .unwrap_or_else(|| "us-east-1".to_string()),
            config.storage.s3_endpoint.clone(),
        )),
    }
}

async fn run_workers(config: Config) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    db.migrate().await?;

    let job_store = Arc::new(PgJobStore::new(&db));
    let worker_config = JobWorkerConfig::from(&config.worker);

    let dispatcher: Arc<dyn EventDispatcher> = Arc::new(LoggingEventDispatcher);
    let webhook_worker = JobWorker::start(
        job_store.clone(),
        Arc::new(WebhookDeliveryHandler::new(Arc::downgrade(&dispatcher))),
        worker_config.clone(),
        Some(db.pool().clone()),
    );

    let transcode_worker = match &config.worker.transcoder_cmd {
        Some(cmd) => {
            let assets = Arc::new(MediaAssetRepository::new(&db));
            let handler = TranscodeHandler::new(
                assets,
                build_storage(&config),
                Arc::new(CommandTranscoder::new(cmd.clone())),
                config.storage.streaming_bucket.clone(),
                config.worker.max_attempts,
            );
            Some(JobWorker::start(
                job_store.clone(),
                Arc::new(handler),
                worker_config,
                Some(db.pool().clone()),
            ))
        }
        None => {
            tracing::warn!("TRANSCODER_CMD is not set; media transcode queue will not be drained");
            None
        }
    };

    tracing::info!("Workers running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    webhook_worker.shutdown().await;
    if let Some(worker) = transcode_worker {
        worker.shutdown().await;
    }
    db.close().await;
    Ok(())
}

async fn run_reconcile(
    config: Config,
    apply: bool,
    batch_size: Option<usize>,
    output: Option<std::path::PathBuf>,
) -> Result<()> {
    let db = Database::connect(&config.database).await?;

    let mut reconciler_config = config.reconciler.clone();
    if let Some(batch_size) = batch_size {
        anyhow::ensure!(batch_size > 0, "--batch-size must be positive");
        reconciler_config.apply_batch_size = batch_size;
    }

    let catalog = PgCatalog::new(&db);
    let reconciler = StorageReconciler::new(build_storage(&config), reconciler_config);

    let report = reconciler.audit(&catalog).await?;
    let json = report.to_json()?;
    match output {
        Some(path) => {
            std::fs::write(&path, &json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            tracing::info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }

    if apply {
        let applied = reconciler.apply(&catalog, &report).await?;
        println!("applied {} catalog updates", applied);
    } else if !report.proposed_updates.is_empty() {
        println!(
            "{} proposed updates (dry-run; pass --apply to persist)",
            report.proposed_updates.len()
        );
    }

    db.close().await;
    Ok(())
}

async fn run_jobs(config: Config, sub: JobCommands) -> Result<()> {
    let db = Database::connect(&config.database).await?;
    let store = PgJobStore::new(&db);

    match sub {
        JobCommands::Stats { queue } => {
            let queue = queue
                .map(|raw| raw.parse::<JobQueue>())
                .transpose()
                .context("Invalid --queue value")?;
            let stats = store.stats(queue).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        JobCommands::Retry { id } => {
            let id: Uuid = id.parse().context("Invalid job UUID")?;
            let job = store.reset_failed(id).await?;
            println!("job {} reset to pending on queue {}", job.id, job.queue);
        }
    }

    db.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Worker => run_workers(config).await,
        Commands::Reconcile {
            apply,
            batch_size,
            output,
        } => run_reconcile(config, apply, batch_size, output).await,
        Commands::Jobs { sub } => run_jobs(config, sub).await,
    }
}
