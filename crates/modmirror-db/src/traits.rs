//! Store traits
//!
//! The worker and CLI depend on these traits only, so the in-memory and
//! Postgres implementations are interchangeable.

use async_trait::async_trait;
use modmirror_core::models::{CatalogEntry, Job, JobStatus, UploadRecord};
use uuid::Uuid;

use crate::StoreError;

/// Durable job queue storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Jobs are never deleted.
    async fn insert(&self, job: Job) -> Result<Job, StoreError>;

    /// Atomically claim the highest-priority pending job (FIFO within a
    /// priority) and move it to `running`. Two concurrent callers never
    /// receive the same job.
    async fn claim_next(&self) -> Result<Option<Job>, StoreError>;

    async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value)
        -> Result<Job, StoreError>;

    async fn mark_failed(&self, id: Uuid, result: serde_json::Value) -> Result<Job, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Jobs with `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Fail every job that has been `running` for at least `grace`.
    /// Returns the ids that were failed.
    async fn fail_stale_running(&self, grace: chrono::Duration) -> Result<Vec<Uuid>, StoreError>;
}

/// Records of files uploaded to this server.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn insert(&self, record: UploadRecord) -> Result<UploadRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, StoreError>;
}

/// Public catalog of archives, unique on `(name, hash)`.
#[async_trait]
pub trait ArchiveCatalog: Send + Sync {
    /// Register an entry. Returns `false` when `(name, hash)` was already
    /// present; the existing entry is left untouched.
    async fn register(&self, entry: CatalogEntry) -> Result<bool, StoreError>;

    async fn get(&self, name: &str, hash: &str) -> Result<Option<CatalogEntry>, StoreError>;

    async fn list(&self) -> Result<Vec<CatalogEntry>, StoreError>;
}
