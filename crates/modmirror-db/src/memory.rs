//! In-memory stores
//!
//! Used by tests and by single-node runs without `DATABASE_URL`. State lives
//! behind a `tokio::sync::Mutex`, which also makes claims exclusive.

use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use modmirror_core::models::{CatalogEntry, Job, JobStatus, UploadRecord};

use crate::traits::{ArchiveCatalog, JobStore, UploadStore};
use crate::{stale_result, StoreError};

#[derive(Clone, Default)]
pub struct MemoryJobStore {
    // Insertion order breaks ties between equal (priority, created_at).
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn finish(
        &self,
        id: Uuid,
        status: JobStatus,
        result: serde_json::Value,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::not_found("job", id))?;
        if job.status != JobStatus::Running {
            return Err(StoreError::Conflict {
                id,
                status: job.status,
            });
        }
        job.status = status;
        job.result = Some(result);
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().await;
        jobs.push(job.clone());
        tracing::debug!(job_id = %job.id, kind = %job.kind(), "Job inserted");
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (Reverse(j.priority), j.created_at));

        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            tracing::debug!(job_id = %job.id, kind = %job.kind(), "Job claimed");
            job.clone()
        }))
    }

    async fn mark_succeeded(
        &self,
        id: Uuid,
        result: serde_json::Value,
    ) -> Result<Job, StoreError> {
        self.finish(id, JobStatus::Succeeded, result).await
    }

    async fn mark_failed(&self, id: Uuid, result: serde_json::Value) -> Result<Job, StoreError> {
        self.finish(id, JobStatus::Failed, result).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs.iter().filter(|j| j.status == status).cloned().collect();
        matching.sort_by_key(|j| j.created_at);
        Ok(matching)
    }

    async fn fail_stale_running(&self, grace: chrono::Duration) -> Result<Vec<Uuid>, StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let mut reaped = Vec::new();
        for job in jobs.iter_mut().filter(|j| j.is_stale(now, grace)) {
            job.status = JobStatus::Failed;
            job.result = Some(stale_result(grace));
            job.completed_at = Some(now);
            reaped.push(job.id);
        }
        if !reaped.is_empty() {
            tracing::warn!(count = reaped.len(), "Reaped stale running jobs");
        }
        Ok(reaped)
    }
}

#[derive(Clone, Default)]
pub struct MemoryUploadStore {
    records: Arc<Mutex<HashMap<Uuid, UploadRecord>>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn insert(&self, record: UploadRecord) -> Result<UploadRecord, StoreError> {
        self.records.lock().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, StoreError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct MemoryArchiveCatalog {
    entries: Arc<Mutex<BTreeMap<(String, String), CatalogEntry>>>,
}

impl MemoryArchiveCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveCatalog for MemoryArchiveCatalog {
    async fn register(&self, entry: CatalogEntry) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let key = (entry.name.clone(), entry.hash.clone());
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, entry);
        Ok(true)
    }

    async fn get(&self, name: &str, hash: &str) -> Result<Option<CatalogEntry>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&(name.to_string(), hash.to_string())).cloned())
    }

    async fn list(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modmirror_core::models::{Archive, DownloadState, HttpState, JobPayload, JobPriority};
    use std::collections::HashSet;

    fn upload_job(priority: JobPriority) -> Job {
        Job::new(
            JobPayload::UploadToMirror {
                file_id: Uuid::new_v4(),
            },
            priority,
        )
    }

    fn entry(name: &str, hash: &str) -> CatalogEntry {
        let archive = Archive::new(
            name,
            10,
            hash,
            DownloadState::Http(HttpState::new("https://mirror.example/a".parse().unwrap())),
        );
        CatalogEntry::from_archive(&archive)
    }

    #[tokio::test]
    async fn claims_by_priority_then_fifo() {
        let store = MemoryJobStore::new();
        let low = store.insert(upload_job(JobPriority::Low)).await.unwrap();
        let normal_a = store.insert(upload_job(JobPriority::Normal)).await.unwrap();
        let normal_b = store.insert(upload_job(JobPriority::Normal)).await.unwrap();
        let high = store.insert(upload_job(JobPriority::High)).await.unwrap();

        let order: Vec<Uuid> = [
            store.claim_next().await.unwrap().unwrap().id,
            store.claim_next().await.unwrap().unwrap().id,
            store.claim_next().await.unwrap().unwrap().id,
            store.claim_next().await.unwrap().unwrap().id,
        ]
        .to_vec();

        assert_eq!(order, vec![high.id, normal_a.id, normal_b.id, low.id]);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_moves_job_to_running() {
        let store = MemoryJobStore::new();
        let job = store.insert(upload_job(JobPriority::Normal)).await.unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());
        assert_eq!(
            store.list_by_status(JobStatus::Running).await.unwrap().len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_are_exclusive() {
        let store = MemoryJobStore::new();
        for _ in 0..50 {
            store.insert(upload_job(JobPriority::Normal)).await.unwrap();
        }

        let claimers = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = store.claim_next().await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            })
        });

        let mut all = Vec::new();
        for handle in futures::future::join_all(claimers).await {
            all.extend(handle.unwrap());
        }
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }

    #[tokio::test]
    async fn stale_reaper_fails_only_old_running_jobs() {
        let store = MemoryJobStore::new();
        store.insert(upload_job(JobPriority::Normal)).await.unwrap();
        store.insert(upload_job(JobPriority::Normal)).await.unwrap();
        let pending = store.insert(upload_job(JobPriority::Low)).await.unwrap();

        let old = store.claim_next().await.unwrap().unwrap();
        let fresh = store.claim_next().await.unwrap().unwrap();
        {
            let mut jobs = store.jobs.lock().await;
            let job = jobs.iter_mut().find(|j| j.id == old.id).unwrap();
            job.started_at = Some(Utc::now() - chrono::Duration::seconds(600));
        }

        let reaped = store
            .fail_stale_running(chrono::Duration::seconds(300))
            .await
            .unwrap();
        assert_eq!(reaped, vec![old.id]);

        let old = store.get(old.id).await.unwrap().unwrap();
        assert_eq!(old.status, JobStatus::Failed);
        assert_eq!(old.result.unwrap()["reason"], "stale");
        assert_eq!(
            store.get(fresh.id).await.unwrap().unwrap().status,
            JobStatus::Running
        );
        assert_eq!(
            store.get(pending.id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
    }

    #[tokio::test]
    async fn finished_jobs_cannot_be_finished_again() {
        let store = MemoryJobStore::new();
        let job = store.insert(upload_job(JobPriority::Normal)).await.unwrap();

        let err = store
            .mark_succeeded(job.id, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { status: JobStatus::Pending, .. }));

        store.claim_next().await.unwrap().unwrap();
        let reaped = store.fail_stale_running(chrono::Duration::zero()).await.unwrap();
        assert_eq!(reaped, vec![job.id]);

        let err = store
            .mark_succeeded(job.id, serde_json::json!({"late": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { status: JobStatus::Failed, .. }));

        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result.unwrap()["reason"], "stale");
    }

    #[tokio::test]
    async fn mark_unknown_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store
            .mark_succeeded(Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "job", .. }));
    }

    #[tokio::test]
    async fn catalog_registration_is_idempotent() {
        let catalog = MemoryArchiveCatalog::new();
        assert!(catalog.register(entry("mod.7z", "aa")).await.unwrap());
        assert!(!catalog.register(entry("mod.7z", "aa")).await.unwrap());
        assert!(catalog.register(entry("mod.7z", "bb")).await.unwrap());
        assert_eq!(catalog.list().await.unwrap().len(), 2);
        assert!(catalog.get("mod.7z", "aa").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn upload_records_round_trip() {
        let uploads = MemoryUploadStore::new();
        let record = UploadRecord::new("mod.7z", 3, "abc", "https://host/mod.7z");
        uploads.insert(record.clone()).await.unwrap();
        assert_eq!(uploads.get(record.id).await.unwrap(), Some(record));
        assert!(uploads.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
