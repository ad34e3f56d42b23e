//! Pipeline job handlers
//!
//! `UploadToMirror` pushes an uploaded file to the mirror and, only when that
//! succeeds, enqueues an `IndexArchive` job for the mirrored copy. Indexing is
//! idempotent on `(name, hash)`.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use modmirror_core::config::JobQueueConfig;
use modmirror_core::models::{
    Archive, CatalogEntry, DownloadState, HttpState, Job, JobPayload, JobPriority, MirrorState,
};
use modmirror_core::{JobError, ProgressSink, ThrottledProgress};
use modmirror_db::{ArchiveCatalog, JobStore, UploadStore};
use modmirror_infra::RateLimiter;
use modmirror_storage::{MirrorStorage, StorageError};

use crate::context::JobHandlerContext;
use crate::queue::{JobFinishedSender, JobQueue};

/// Services the handlers need besides the queue itself.
#[derive(Clone)]
pub struct PipelineServices {
    pub uploads: Arc<dyn UploadStore>,
    pub catalog: Arc<dyn ArchiveCatalog>,
    pub mirror: Arc<dyn MirrorStorage>,
    pub upload_dir: PathBuf,
    pub progress: Arc<dyn ProgressSink>,
}

pub struct PipelineContext {
    jobs: JobQueue,
    services: PipelineServices,
}

impl PipelineContext {
    /// Build the context together with the worker pool that dispatches into it.
    pub fn start(
        services: PipelineServices,
        store: Arc<dyn JobStore>,
        rate_limiter: RateLimiter,
        config: JobQueueConfig,
        pool: Option<sqlx::PgPool>,
        finished_tx: Option<JobFinishedSender>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<PipelineContext>| {
            let context: Weak<dyn JobHandlerContext> = weak.clone();
            let jobs = JobQueue::new(store, rate_limiter, config, context, pool, finished_tx);
            Self { jobs, services }
        })
    }

    /// Context over a queue without a worker, for callers that only enqueue
    /// or run handlers inline.
    pub fn without_worker(services: PipelineServices, jobs: JobQueue) -> Arc<Self> {
        Arc::new(Self { jobs, services })
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    #[tracing::instrument(skip(self))]
    pub async fn upload_to_mirror(&self, file_id: Uuid) -> Result<serde_json::Value> {
        let record = self
            .services
            .uploads
            .get(file_id)
            .await?
            .ok_or_else(|| JobError::unrecoverable(anyhow::anyhow!("Upload record {} not found", file_id)))?;

        let local_path = self.services.upload_dir.join(&record.local_name);
        let progress = ThrottledProgress::new(record.local_name.clone(), self.services.progress.clone());

        let url = self
            .services
            .mirror
            .upload(&local_path, &record.local_name, &progress)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) | StorageError::InvalidKey(_) => JobError::unrecoverable(e),
                other => JobError::recoverable(other),
            })?;

        tracing::info!(
            file_id = %file_id,
            remote_name = %record.local_name,
            url = %url,
            "Uploaded file to mirror"
        );

        let archive = Archive::new(
            record.local_name.clone(),
            record.size,
            record.hash.clone(),
            DownloadState::Http(HttpState::new(url.clone())),
        );
        let index_job_id = self
            .jobs
            .enqueue(JobPayload::IndexArchive { archive }, JobPriority::High)
            .await?;

        let mirrored = DownloadState::Mirror(MirrorState {
            remote_name: record.local_name,
            url: url.clone(),
        });
        Ok(json!({
            "url": url,
            "state": mirrored,
            "index_job_id": index_job_id,
        }))
    }

    #[tracing::instrument(skip(self, archive), fields(archive.name = %archive.name, archive.hash = %archive.hash))]
    pub async fn index_archive(&self, archive: &Archive) -> Result<serde_json::Value> {
        let inserted = self
            .services
            .catalog
            .register(CatalogEntry::from_archive(archive))
            .await?;

        if inserted {
            tracing::info!("Archive added to catalog");
        } else {
            tracing::debug!("Archive already in catalog");
        }

        Ok(json!({
            "name": archive.name,
            "hash": archive.hash,
            "inserted": inserted,
        }))
    }
}

#[async_trait]
impl JobHandlerContext for PipelineContext {
    async fn dispatch_job(self: Arc<Self>, job: &Job) -> Result<serde_json::Value> {
        match &job.payload {
            JobPayload::UploadToMirror { file_id } => self.upload_to_mirror(*file_id).await,
            JobPayload::IndexArchive { archive } => self.index_archive(archive).await,
        }
    }
}
