//! Job queue: worker pool, LISTEN/NOTIFY or polling, stale reaping and submission.
//!
//! Shutdown: [`JobQueue::shutdown`] signals the pool to stop; it does not wait for
//! in-flight jobs. Jobs still running when the process exits stay `running` until
//! the stale reaper of the next worker fails them.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use modmirror_core::config::JobQueueConfig;
use modmirror_core::models::{Job, JobPayload, JobPriority, JobStatus};
use modmirror_core::JobError;
use modmirror_db::{JobStore, StoreError, JOB_NOTIFY_CHANNEL};
use modmirror_infra::RateLimiter;

use crate::context::JobHandlerContext;

/// Optional sender notified with every job's terminal status.
pub type JobFinishedSender = mpsc::Sender<(Uuid, JobStatus)>;

const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: JobQueueConfig,
    wake: Arc<Notify>,
    shutdown_tx: mpsc::Sender<()>,
}

impl JobQueue {
    /// Create a queue and spawn its worker pool.
    ///
    /// If `pool` is `Some`, the worker also wakes on PostgreSQL NOTIFY so jobs
    /// inserted by other processes start without waiting for the next poll.
    pub fn new(
        store: Arc<dyn JobStore>,
        rate_limiter: RateLimiter,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        pool: Option<sqlx::PgPool>,
        finished_tx: Option<JobFinishedSender>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let wake = Arc::new(Notify::new());

        let worker = Worker {
            store: store.clone(),
            rate_limiter,
            config: config.clone(),
            context,
            wake: wake.clone(),
            semaphore: Arc::new(Semaphore::new(config.max_workers.max(1))),
            finished_tx,
        };
        tokio::spawn(async move {
            worker.run(shutdown_rx, pool).await;
        });

        Self {
            store,
            config,
            wake,
            shutdown_tx,
        }
    }

    /// Creates a queue that does not spawn a worker. Jobs enqueued here are
    /// durable and picked up by whichever worker shares the store.
    pub fn new_no_worker(store: Arc<dyn JobStore>, config: JobQueueConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            store,
            config,
            wake: Arc::new(Notify::new()),
            shutdown_tx,
        }
    }

    /// Durably insert a new pending job.
    #[tracing::instrument(skip(self, payload), fields(job.kind = %payload.kind()))]
    pub async fn enqueue(&self, payload: JobPayload, priority: JobPriority) -> Result<Uuid> {
        let description = payload.description();
        let job = self
            .store
            .insert(Job::new(payload, priority))
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    priority = priority.as_i32(),
                    "Failed to insert job into store"
                );
                anyhow::anyhow!("Failed to insert job into store: {}", e)
            })?;

        tracing::info!(
            job_id = %job.id,
            priority = priority.as_i32(),
            description = %description,
            "Job enqueued"
        );
        self.wake.notify_one();

        Ok(job.id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.store.get(id).await?)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    /// Signals the worker pool to stop claiming new jobs and exit its loop.
    ///
    /// Returns immediately; jobs already dispatched keep running until they
    /// finish or hit the job timeout.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Everything the pool loop and its spawned jobs share.
#[derive(Clone)]
struct Worker {
    store: Arc<dyn JobStore>,
    rate_limiter: RateLimiter,
    config: JobQueueConfig,
    context: Weak<dyn JobHandlerContext>,
    wake: Arc<Notify>,
    semaphore: Arc<Semaphore>,
    finished_tx: Option<JobFinishedSender>,
}

impl Worker {
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>, pool: Option<sqlx::PgPool>) {
        tracing::info!(
            max_workers = self.config.max_workers,
            poll_interval_ms = self.config.poll_interval_ms,
            timeout_secs = self.config.timeout_secs,
            listen_notify = pool.is_some(),
            "Job queue worker pool started"
        );

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));

        if let Some(pool) = pool {
            tokio::spawn(listen_for_jobs(pool, self.wake.clone()));
        }

        let (reaper_shutdown_tx, reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if self.config.stale_reap_interval_secs > 0 {
            tokio::spawn(self.clone().reap_stale(reaper_shutdown_rx));
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = self.wake.notified() => {
                    self.claim_and_dispatch_one().await;
                }
                _ = sleep(poll_interval) => {
                    self.claim_and_dispatch_one().await;
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(&self) {
        let Some(ctx) = self.context.upgrade() else {
            tracing::trace!("Job handler context is gone, skipping claim");
            return;
        };

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match self.store.claim_next().await {
            Ok(Some(job)) => {
                let worker = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = worker.process_job(job, ctx).await {
                        tracing::error!(error = %e, "Failed to record job outcome");
                    }
                    drop(permit);
                    // A slot is free again; look for more work right away.
                    worker.wake.notify_one();
                });
                // There may be more pending jobs than wake-ups.
                self.wake.notify_one();
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim job from queue");
            }
        }
    }

    #[tracing::instrument(skip(self, job, ctx), fields(job.id = %job.id, job.kind = %job.kind()))]
    async fn process_job(&self, job: Job, ctx: Arc<dyn JobHandlerContext>) -> Result<()> {
        self.rate_limiter.acquire(job.kind()).await;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let outcome = tokio::time::timeout(timeout, ctx.dispatch_job(&job)).await;

        let recorded = match outcome {
            Ok(Ok(result)) => self
                .store
                .mark_succeeded(job.id, result)
                .await
                .map(|_| JobStatus::Succeeded),
            Ok(Err(e)) => {
                let error_result = failure_result(&e);
                tracing::error!(
                    job_id = %job.id,
                    error = %format!("{:#}", e),
                    recoverable = %error_result["recoverable"],
                    "Job execution failed"
                );
                self.store
                    .mark_failed(job.id, error_result)
                    .await
                    .map(|_| JobStatus::Failed)
            }
            Err(_) => {
                tracing::error!(
                    job_id = %job.id,
                    timeout_secs = self.config.timeout_secs,
                    "Job execution timed out"
                );
                self.store
                    .mark_failed(
                        job.id,
                        json!({
                            "error": "Job execution timed out",
                            "timeout_secs": self.config.timeout_secs,
                            "recoverable": true,
                        }),
                    )
                    .await
                    .map(|_| JobStatus::Failed)
            }
        };

        let status = match recorded {
            Ok(status) => status,
            // The reaper got there first and already reported the job.
            Err(StoreError::Conflict { status, .. }) => {
                tracing::warn!(
                    job_id = %job.id,
                    recorded_status = %status,
                    "Job finished after it was already closed, outcome discarded"
                );
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to record job outcome"),
        };
        if status == JobStatus::Succeeded {
            tracing::info!(job_id = %job.id, job_kind = %job.kind(), "Job succeeded");
        }

        self.notify_finished(job.id, status).await;
        Ok(())
    }

    async fn reap_stale(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.stale_reap_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let grace = chrono::Duration::seconds(self.config.stale_grace_secs);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.store.fail_stale_running(grace).await {
                        Ok(ids) => {
                            if !ids.is_empty() {
                                tracing::warn!(count = ids.len(), "Failed stale running jobs");
                            }
                            for id in ids {
                                self.notify_finished(id, JobStatus::Failed).await;
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "Stale job reaper failed"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    async fn notify_finished(&self, id: Uuid, status: JobStatus) {
        if let Some(ref tx) = self.finished_tx {
            let _ = tx.send((id, status)).await;
        }
    }
}

/// Result JSON for a failed job. Errors that are not a [`JobError`] count as
/// recoverable.
fn failure_result(error: &anyhow::Error) -> serde_json::Value {
    match error.downcast_ref::<JobError>() {
        Some(job_error) => job_error.to_result_json(),
        None => json!({
            "error": format!("{:#}", error),
            "recoverable": true,
        }),
    }
}

async fn listen_for_jobs(pool: sqlx::PgPool, wake: Arc<Notify>) {
    loop {
        match sqlx::postgres::PgListener::connect_with(&pool).await {
            Ok(mut listener) => {
                if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                    tracing::warn!(error = %e, "LISTEN failed, will retry");
                    sleep(LISTEN_RETRY_DELAY).await;
                    continue;
                }
                while listener.recv().await.is_ok() {
                    wake.notify_one();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "PgListener connect failed, will retry");
                sleep(LISTEN_RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::empty_context_weak;
    use async_trait::async_trait;
    use modmirror_core::models::Archive;
    use modmirror_core::models::{DownloadState, HttpState};
    use modmirror_db::MemoryJobStore;

    fn test_config() -> JobQueueConfig {
        JobQueueConfig {
            max_workers: 2,
            poll_interval_ms: 20,
            timeout_secs: 1,
            stale_reap_interval_secs: 0,
            stale_grace_secs: 300,
            rate_limit_per_sec: 1000.0,
        }
    }

    fn index_payload(name: &str) -> JobPayload {
        let url = url::Url::parse("https://mirror.example/a.zip").unwrap();
        JobPayload::IndexArchive {
            archive: Archive::new(name, 1, "aa", DownloadState::Http(HttpState::new(url))),
        }
    }

    /// Succeeds, succeeds slowly, fails unrecoverably, fails with a plain
    /// error or hangs, depending on the archive name.
    struct ScriptedContext;

    #[async_trait]
    impl JobHandlerContext for ScriptedContext {
        async fn dispatch_job(self: Arc<Self>, job: &Job) -> Result<serde_json::Value> {
            let JobPayload::IndexArchive { archive } = &job.payload else {
                anyhow::bail!("unexpected payload");
            };
            match archive.name.as_str() {
                "ok" => Ok(json!({ "handled": archive.name })),
                "fatal" => Err(JobError::unrecoverable(anyhow::anyhow!("bad payload")).into()),
                "plain" => Err(anyhow::anyhow!("connection reset")),
                "slow" => {
                    sleep(Duration::from_millis(1500)).await;
                    Ok(json!({ "handled": archive.name }))
                }
                _ => {
                    sleep(Duration::from_secs(30)).await;
                    Ok(json!({}))
                }
            }
        }
    }

    async fn finished(rx: &mut mpsc::Receiver<(Uuid, JobStatus)>, n: usize) -> Vec<(Uuid, JobStatus)> {
        let mut out = Vec::new();
        while out.len() < n {
            let next = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for finished jobs")
                .expect("finished channel closed");
            out.push(next);
        }
        out
    }

    #[tokio::test]
    async fn records_success_and_error_shapes() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Arc::new(ScriptedContext);
        let (tx, mut rx) = mpsc::channel(8);
        let queue = JobQueue::new(
            store.clone(),
            RateLimiter::new(1000.0),
            test_config(),
            Arc::downgrade(&ctx),
            None,
            Some(tx),
        );

        let ok = queue.enqueue(index_payload("ok"), JobPriority::Normal).await.unwrap();
        let fatal = queue.enqueue(index_payload("fatal"), JobPriority::Normal).await.unwrap();
        let plain = queue.enqueue(index_payload("plain"), JobPriority::Normal).await.unwrap();
        finished(&mut rx, 3).await;

        let ok = queue.get(ok).await.unwrap().unwrap();
        assert_eq!(ok.status, JobStatus::Succeeded);
        assert_eq!(ok.result.unwrap()["handled"], "ok");

        let fatal = queue.get(fatal).await.unwrap().unwrap();
        assert_eq!(fatal.status, JobStatus::Failed);
        let result = fatal.result.unwrap();
        assert_eq!(result["recoverable"], false);
        assert_eq!(result["error"], "bad payload");

        let plain = queue.get(plain).await.unwrap().unwrap();
        assert_eq!(plain.status, JobStatus::Failed);
        assert_eq!(plain.result.unwrap()["recoverable"], true);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn timed_out_job_is_failed() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Arc::new(ScriptedContext);
        let (tx, mut rx) = mpsc::channel(8);
        let queue = JobQueue::new(
            store.clone(),
            RateLimiter::new(1000.0),
            test_config(),
            Arc::downgrade(&ctx),
            None,
            Some(tx),
        );

        let id = queue.enqueue(index_payload("hang"), JobPriority::Normal).await.unwrap();
        assert_eq!(finished(&mut rx, 1).await, vec![(id, JobStatus::Failed)]);
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.result.unwrap()["error"], "Job execution timed out");
    }

    #[tokio::test]
    async fn stale_running_jobs_are_reaped() {
        let store = Arc::new(MemoryJobStore::new());
        let stuck = store
            .insert(Job::new(index_payload("ok"), JobPriority::Normal))
            .await
            .unwrap();
        store.claim_next().await.unwrap().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let config = JobQueueConfig {
            stale_reap_interval_secs: 1,
            stale_grace_secs: 0,
            ..test_config()
        };
        let queue = JobQueue::new(
            store.clone(),
            RateLimiter::new(1000.0),
            config,
            empty_context_weak(),
            None,
            Some(tx),
        );

        assert_eq!(finished(&mut rx, 1).await, vec![(stuck.id, JobStatus::Failed)]);
        let job = queue.get(stuck.id).await.unwrap().unwrap();
        assert_eq!(job.result.unwrap()["reason"], modmirror_db::STALE_REASON);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn reaped_job_keeps_its_failure_when_the_handler_finishes() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Arc::new(ScriptedContext);
        let (tx, mut rx) = mpsc::channel(8);
        let config = JobQueueConfig {
            timeout_secs: 10,
            stale_reap_interval_secs: 1,
            stale_grace_secs: 0,
            ..test_config()
        };
        let queue = JobQueue::new(
            store.clone(),
            RateLimiter::new(1000.0),
            config,
            Arc::downgrade(&ctx),
            None,
            Some(tx),
        );

        let id = queue.enqueue(index_payload("slow"), JobPriority::Normal).await.unwrap();
        assert_eq!(finished(&mut rx, 1).await, vec![(id, JobStatus::Failed)]);

        // Let the handler return after the reaper closed the job.
        sleep(Duration::from_millis(2500)).await;
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result.unwrap()["reason"], modmirror_db::STALE_REASON);
        assert!(rx.try_recv().is_err());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn queue_without_worker_only_inserts() {
        let store = Arc::new(MemoryJobStore::new());
        let queue = JobQueue::new_no_worker(store.clone(), test_config());
        let id = queue.enqueue(index_payload("ok"), JobPriority::High).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, JobPriority::High);
    }

    #[test]
    fn plain_errors_are_recorded_as_recoverable() {
        let result = failure_result(&anyhow::anyhow!("generic error"));
        assert_eq!(result["recoverable"], true);

        let err: anyhow::Error = JobError::unrecoverable(anyhow::anyhow!("bad config")).into();
        assert_eq!(failure_result(&err)["recoverable"], false);
    }
}
