//! modmirror: acquire archives from third-party hosts and republish them to a mirror.
//!
//! Configuration comes from the environment (and `.env`); see `Config`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use modmirror_cli::{
    download_context, login_helper, open_vault, print_json, read_descriptor, stage_upload,
    stop_downloads_on_ctrl_c, Stores,
};
use modmirror_core::models::{Archive, JobPayload, JobPriority};
use modmirror_core::{Config, TracingProgress};
use modmirror_db::{JobStore, UploadStore};
use modmirror_downloaders::{Acquire, Resolver, DEPOT_SERVICE};
use modmirror_infra::{init_telemetry, LogFormat, RateLimiter};
use modmirror_storage::MirrorStorage;
use modmirror_worker::{JobQueue, PipelineContext, PipelineServices};

#[derive(Parser)]
#[command(name = "modmirror", version, about = "Archive acquisition and mirroring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job worker pool until interrupted
    Serve,
    /// Download the archive a descriptor file points at
    Fetch {
        /// Descriptor file (ini with a [General] section)
        descriptor: PathBuf,
        /// Where to write the archive
        #[arg(long, short)]
        output: PathBuf,
        /// Expected size in bytes; checked together with --hash
        #[arg(long, requires = "hash")]
        size: Option<u64>,
        /// Expected SHA-256 (hex)
        #[arg(long, requires = "size")]
        hash: Option<String>,
    },
    /// Check that a descriptor's source still resolves, without downloading it
    Verify {
        descriptor: PathBuf,
    },
    /// Register a local file as an upload and queue it for mirroring
    EnqueueUpload {
        file: PathBuf,
        /// Where the file originally came from
        #[arg(long)]
        source_uri: Option<String>,
    },
    /// Show one job
    Job {
        id: Uuid,
    },
    /// Run the login helper and store the captured login
    Login {
        #[arg(default_value = DEPOT_SERVICE)]
        service: String,
    },
    /// Delete a stored login
    Logout {
        #[arg(default_value = DEPOT_SERVICE)]
        service: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;

    let format = config
        .log_format
        .parse::<LogFormat>()
        .map_err(anyhow::Error::msg)?;
    init_telemetry("modmirror", &config.environment, format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    match cli.command {
        Commands::Serve => serve(&config).await?,
        Commands::Fetch {
            descriptor,
            output,
            size,
            hash,
        } => {
            let descriptor = read_descriptor(&descriptor).await?;
            let resolver = Resolver::new(download_context(&config).await?);
            let state = resolver
                .recognize(&descriptor)
                .context("No download protocol recognizes this descriptor")?;

            let cancel = CancellationToken::new();
            stop_downloads_on_ctrl_c(resolver.context().broker.clone(), cancel.clone());

            let digest = match (size, hash) {
                (Some(size), Some(hash)) => {
                    let name = output
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let archive = Archive::new(name, size, hash, state.clone());
                    resolver.acquire(&archive, &output, &cancel).await?
                }
                _ => resolver.fetch_state(&state, &output, &cancel).await?,
            };

            print_json(&serde_json::json!({
                "source": state.describe_for_report(),
                "state": state,
                "path": output,
                "size": digest.size,
                "hash": digest.hash,
            }))?;
        }
        Commands::Verify { descriptor } => {
            let descriptor = read_descriptor(&descriptor).await?;
            let resolver = Resolver::new(download_context(&config).await?);
            let state = resolver
                .recognize(&descriptor)
                .context("No download protocol recognizes this descriptor")?;
            stop_downloads_on_ctrl_c(resolver.context().broker.clone(), CancellationToken::new());
            let available = resolver.verify(&state).await?;
            print_json(&serde_json::json!({
                "source": state.describe_for_report(),
                "available": available,
            }))?;
        }
        Commands::EnqueueUpload { file, source_uri } => {
            let stores = Stores::open(&config).await?;
            if !stores.is_durable() {
                anyhow::bail!("enqueue-upload needs DATABASE_URL so a worker can pick the job up");
            }
            let record = stage_upload(&config.upload_dir, &file, source_uri).await?;
            let record = stores.uploads.insert(record).await?;

            let queue = JobQueue::new_no_worker(stores.jobs.clone(), config.job_queue.clone());
            let job_id = queue
                .enqueue(
                    JobPayload::UploadToMirror { file_id: record.id },
                    JobPriority::Normal,
                )
                .await?;
            print_json(&serde_json::json!({ "upload": record, "job_id": job_id }))?;
        }
        Commands::Job { id } => {
            let stores = Stores::open(&config).await?;
            let job = stores
                .jobs
                .get(id)
                .await?
                .with_context(|| format!("Job {} not found", id))?;
            print_json(&job)?;
        }
        Commands::Login { service } => {
            let helper = login_helper(&config).context("LOGIN_HELPER_COMMAND is not set")?;
            let vault = open_vault(&config).await?;
            helper.run(&service, &vault).await?;
            print_json(&serde_json::json!({ "service": service, "logged_in": true }))?;
        }
        Commands::Logout { service } => {
            let vault = open_vault(&config).await?;
            let removed = vault.delete(&service).await?;
            print_json(&serde_json::json!({ "service": service, "removed": removed }))?;
        }
    }

    Ok(())
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let stores = Stores::open(config).await?;
    let mirror = modmirror_storage::create_mirror(&config.mirror)
        .await
        .context("Failed to create mirror backend")?;
    tracing::info!(
        backend = ?mirror.backend_type(),
        public_base = %mirror.public_base(),
        "Mirror backend ready"
    );

    let services = PipelineServices {
        uploads: stores.uploads.clone(),
        catalog: stores.catalog.clone(),
        mirror,
        upload_dir: config.upload_dir.clone(),
        progress: Arc::new(TracingProgress),
    };
    let pipeline = PipelineContext::start(
        services,
        stores.jobs.clone(),
        RateLimiter::new(config.job_queue.rate_limit_per_sec),
        config.job_queue.clone(),
        stores.pool.clone(),
        None,
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    pipeline.jobs().shutdown().await;
    Ok(())
}
