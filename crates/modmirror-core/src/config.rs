//! Configuration module
//!
//! Everything is read from environment variables (optionally through a `.env`
//! file). Unparseable numeric values fall back to their defaults; structural
//! problems are reported by [`Config::validate`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use url::Url;

use crate::storage_types::MirrorBackend;

const DEFAULT_DEPOT_API_BASE: &str = "https://api.bethesda.net";
const DEFAULT_DEPOT_CONTENT_BASE: &str = "https://content.cdp.bethesda.net";
const HTTP_TIMEOUT_SECS: u64 = 60;
const JOB_QUEUE_MAX_WORKERS: usize = 4;
const JOB_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const JOB_QUEUE_TIMEOUT_SECS: u64 = 3600;
const STALE_JOB_REAP_INTERVAL_SECS: u64 = 60;
const STALE_JOB_GRACE_PERIOD_SECS: i64 = 3900;
const JOB_QUEUE_RATE_LIMIT_PER_SEC: f64 = 5.0;

/// Mirror back-end settings
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    pub backend: MirrorBackend,
    pub local_path: Option<PathBuf>,
    pub public_base_url: Option<Url>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, R2, ...)
    pub s3_endpoint: Option<String>,
}

/// Worker pool settings
#[derive(Clone, Debug)]
pub struct JobQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
    /// Interval between stale-job reaper runs. 0 = disabled.
    pub stale_reap_interval_secs: u64,
    /// How long a job may stay `running` before the reaper fails it. Must
    /// exceed `timeout_secs` so a live job is never reaped.
    pub stale_grace_secs: i64,
    pub rate_limit_per_sec: f64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: JOB_QUEUE_MAX_WORKERS,
            poll_interval_ms: JOB_QUEUE_POLL_INTERVAL_MS,
            timeout_secs: JOB_QUEUE_TIMEOUT_SECS,
            stale_reap_interval_secs: STALE_JOB_REAP_INTERVAL_SECS,
            stale_grace_secs: STALE_JOB_GRACE_PERIOD_SECS,
            rate_limit_per_sec: JOB_QUEUE_RATE_LIMIT_PER_SEC,
        }
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    /// Postgres connection string. The in-memory stores are used when absent.
    pub database_url: Option<String>,
    pub mirror: MirrorConfig,
    pub upload_dir: PathBuf,
    pub vault_dir: PathBuf,
    /// Base64-encoded 32-byte key for the credential vault.
    pub vault_key: Option<String>,
    pub login_helper_command: Option<String>,
    pub depot_api_base: Url,
    pub depot_content_base: Url,
    pub http_timeout_secs: u64,
    /// URL prefixes user-declared downloads may come from.
    pub download_whitelist: Vec<String>,
    pub job_queue: JobQueueConfig,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = var("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let backend = match var("MIRROR_BACKEND") {
            Some(value) => value.parse::<MirrorBackend>()?,
            None => MirrorBackend::Local,
        };

        let public_base_url = var("MIRROR_PUBLIC_BASE_URL")
            .map(|v| Url::parse(&v).context("MIRROR_PUBLIC_BASE_URL is not a valid URL"))
            .transpose()?;

        let mirror = MirrorConfig {
            backend,
            local_path: var("MIRROR_LOCAL_PATH").map(PathBuf::from),
            public_base_url,
            s3_bucket: var("MIRROR_S3_BUCKET"),
            s3_region: var("MIRROR_S3_REGION"),
            s3_endpoint: var("MIRROR_S3_ENDPOINT"),
        };

        let depot_api_base = Url::parse(
            &var("DEPOT_API_BASE").unwrap_or_else(|| DEFAULT_DEPOT_API_BASE.to_string()),
        )
        .context("DEPOT_API_BASE is not a valid URL")?;
        let depot_content_base = Url::parse(
            &var("DEPOT_CONTENT_BASE").unwrap_or_else(|| DEFAULT_DEPOT_CONTENT_BASE.to_string()),
        )
        .context("DEPOT_CONTENT_BASE is not a valid URL")?;

        let download_whitelist = var("DOWNLOAD_WHITELIST")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let job_queue = JobQueueConfig {
            max_workers: var("JOB_QUEUE_MAX_WORKERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(JOB_QUEUE_MAX_WORKERS),
            poll_interval_ms: var("JOB_QUEUE_POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(JOB_QUEUE_POLL_INTERVAL_MS),
            timeout_secs: var("JOB_QUEUE_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(JOB_QUEUE_TIMEOUT_SECS),
            stale_reap_interval_secs: var("JOB_QUEUE_STALE_REAP_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(STALE_JOB_REAP_INTERVAL_SECS),
            stale_grace_secs: var("JOB_QUEUE_STALE_GRACE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(STALE_JOB_GRACE_PERIOD_SECS),
            rate_limit_per_sec: var("JOB_QUEUE_RATE_LIMIT_PER_SEC")
                .and_then(|v| v.parse().ok())
                .unwrap_or(JOB_QUEUE_RATE_LIMIT_PER_SEC),
        };

        Ok(Config {
            environment,
            database_url: var("DATABASE_URL"),
            mirror,
            upload_dir: var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./uploads")),
            vault_dir: var("VAULT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./vault")),
            vault_key: var("VAULT_KEY"),
            login_helper_command: var("LOGIN_HELPER_COMMAND"),
            depot_api_base,
            depot_content_base,
            http_timeout_secs: var("HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(HTTP_TIMEOUT_SECS),
            download_whitelist,
            job_queue,
            log_format: var("LOG_FORMAT").unwrap_or_else(|| "text".to_string()),
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        match self.mirror.backend {
            MirrorBackend::S3 => {
                if self.mirror.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "MIRROR_S3_BUCKET must be set when using the S3 mirror backend"
                    ));
                }
                if self.mirror.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "MIRROR_S3_REGION must be set when using the S3 mirror backend"
                    ));
                }
            }
            MirrorBackend::Local => {
                if self.mirror.local_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "MIRROR_LOCAL_PATH must be set when using the local mirror backend"
                    ));
                }
                if self.mirror.public_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "MIRROR_PUBLIC_BASE_URL must be set when using the local mirror backend"
                    ));
                }
            }
        }

        match &self.vault_key {
            Some(key) => {
                let decoded = general_purpose::STANDARD
                    .decode(key.trim())
                    .context("VAULT_KEY is not valid base64")?;
                if decoded.len() != 32 {
                    return Err(anyhow::anyhow!("VAULT_KEY must decode to 32 bytes"));
                }
            }
            None if self.is_production() => {
                return Err(anyhow::anyhow!("VAULT_KEY must be set in production"));
            }
            None => {}
        }

        if self.job_queue.max_workers == 0 {
            return Err(anyhow::anyhow!("JOB_QUEUE_MAX_WORKERS must be at least 1"));
        }

        if self.job_queue.stale_reap_interval_secs > 0
            && self.job_queue.stale_grace_secs <= self.job_queue.timeout_secs as i64
        {
            return Err(anyhow::anyhow!(
                "JOB_QUEUE_STALE_GRACE_SECS ({}) must be greater than JOB_QUEUE_TIMEOUT_SECS ({})",
                self.job_queue.stale_grace_secs,
                self.job_queue.timeout_secs
            ));
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(anyhow::anyhow!("LOG_FORMAT must be 'text' or 'json'"));
        }

        Ok(())
    }
}
