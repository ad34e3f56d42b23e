//! Wiring shared by the `modmirror` subcommands.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use modmirror_core::models::UploadRecord;
use modmirror_core::{Config, Descriptor, EncryptionService};
use modmirror_db::{
    ArchiveCatalog, JobStore, MemoryArchiveCatalog, MemoryJobStore, MemoryUploadStore,
    PgArchiveCatalog, PgJobStore, PgUploadStore, UploadStore,
};
use modmirror_downloaders::helper::decline_all;
use modmirror_downloaders::{hash_file, CredentialVault, DownloadContext, LoginBroker, ProcessLoginHelper};
use modmirror_storage::validate_remote_name;

/// Job, upload and catalog stores, Postgres-backed when `DATABASE_URL` is set.
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub uploads: Arc<dyn UploadStore>,
    pub catalog: Arc<dyn ArchiveCatalog>,
    pub pool: Option<sqlx::PgPool>,
}

impl Stores {
    pub async fn open(config: &Config) -> Result<Self> {
        match &config.database_url {
            Some(url) => {
                let pool = modmirror_db::connect(url)
                    .await
                    .context("Failed to connect to database")?;
                modmirror_db::run_migrations(&pool)
                    .await
                    .context("Failed to run migrations")?;
                Ok(Self {
                    jobs: Arc::new(PgJobStore::new(pool.clone())),
                    uploads: Arc::new(PgUploadStore::new(pool.clone())),
                    catalog: Arc::new(PgArchiveCatalog::new(pool.clone())),
                    pool: Some(pool),
                })
            }
            None => {
                tracing::warn!("DATABASE_URL not set, jobs live in memory and are lost on exit");
                Ok(Self::in_memory())
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(MemoryJobStore::new()),
            uploads: Arc::new(MemoryUploadStore::new()),
            catalog: Arc::new(MemoryArchiveCatalog::new()),
            pool: None,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.pool.is_some()
    }
}

pub async fn open_vault(config: &Config) -> Result<Arc<CredentialVault>> {
    let key = config
        .vault_key
        .as_deref()
        .context("VAULT_KEY must be set to use the credential vault")?;
    let encryption = EncryptionService::from_base64_key(key)?;
    let vault = CredentialVault::open(&config.vault_dir, encryption).await?;
    Ok(Arc::new(vault))
}

/// The configured login helper, if any.
pub fn login_helper(config: &Config) -> Option<ProcessLoginHelper> {
    config
        .login_helper_command
        .as_deref()
        .and_then(ProcessLoginHelper::from_command_line)
}

/// Download context whose login prompts are answered by the configured
/// helper, or declined when there is none.
pub async fn download_context(config: &Config) -> Result<DownloadContext> {
    let vault = open_vault(config).await?;
    let (broker, events) = LoginBroker::new(vault);

    match login_helper(config) {
        Some(helper) => {
            tokio::spawn(Arc::new(helper).serve(events, broker.clone()));
        }
        None => {
            tokio::spawn(decline_all(events, broker.clone()));
        }
    }

    Ok(DownloadContext::from_config(config, broker)?)
}

/// Stop in-flight downloads: cancel transfers and close every open login
/// prompt so its waiters see it abandoned.
pub async fn stop_downloads(broker: &LoginBroker, cancel: &CancellationToken) {
    cancel.cancel();
    let abandoned = broker.abandon_all().await;
    if abandoned > 0 {
        tracing::info!(abandoned, "Closed pending login prompts on shutdown");
    }
}

/// Run [`stop_downloads`] when the process receives Ctrl-C.
pub fn stop_downloads_on_ctrl_c(broker: LoginBroker, cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop_downloads(&broker, &cancel).await;
        }
    });
}

pub async fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
    Ok(Descriptor::parse(&text))
}

/// Place `file` in the upload directory (copying it unless it is already
/// there) and describe it as an upload record.
pub async fn stage_upload(upload_dir: &Path, file: &Path, source_uri: Option<String>) -> Result<UploadRecord> {
    let local_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", file.display()))?
        .to_string();
    validate_remote_name(&local_name)?;

    tokio::fs::create_dir_all(upload_dir).await?;
    let target = upload_dir.join(&local_name);
    let same_file = match (tokio::fs::canonicalize(file).await, tokio::fs::canonicalize(&target).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same_file {
        tokio::fs::copy(file, &target)
            .await
            .with_context(|| format!("Failed to copy {} into {}", file.display(), upload_dir.display()))?;
    }

    let digest = hash_file(&target).await?;
    let source_uri = source_uri.unwrap_or_else(|| file.display().to_string());
    Ok(UploadRecord::new(local_name, digest.size, digest.hash, source_uri))
}

pub fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}
