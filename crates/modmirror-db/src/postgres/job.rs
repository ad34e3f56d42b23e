use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use modmirror_core::models::{Job, JobPayload, JobPriority, JobStatus};

use crate::traits::JobStore;
use crate::{stale_result, StoreError};

/// Channel for PostgreSQL LISTEN/NOTIFY when a new job is inserted.
pub const JOB_NOTIFY_CHANNEL: &str = "modmirror_new_job";

const JOB_COLUMNS: &str =
    "id, priority, payload, status, result, created_at, started_at, completed_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    priority: i32,
    payload: serde_json::Value,
    status: JobStatus,
    result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let payload: JobPayload = serde_json::from_value(row.payload).map_err(|e| {
            StoreError::Corrupt(format!("job {} has an unreadable payload: {}", row.id, e))
        })?;
        Ok(Job {
            id: row.id,
            priority: JobPriority::from_i32(row.priority),
            payload,
            status: row.status,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            result: row.result,
        })
    }
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn finish(
        &self,
        id: Uuid,
        status: JobStatus,
        result: serde_json::Value,
    ) -> Result<Job, StoreError> {
        let row: Option<JobRow> = sqlx::query_as::<Postgres, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = $2,
                result = $3,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .bind(result)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => match self.get(id).await? {
                Some(job) => Err(StoreError::Conflict {
                    id,
                    status: job.status,
                }),
                None => Err(StoreError::not_found("job", id)),
            },
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, job.kind = %job.kind()))]
    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        let payload = serde_json::to_value(&job.payload)?;

        let mut tx = self.pool.begin().await?;

        let row: JobRow = sqlx::query_as::<Postgres, JobRow>(&format!(
            r#"
            INSERT INTO jobs (id, kind, priority, payload, status, result, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(job.id)
        .bind(job.kind().to_string())
        .bind(job.priority.as_i32())
        .bind(payload)
        .bind(job.status)
        .bind(&job.result)
        .bind(job.created_at)
        .fetch_one(&mut *tx)
        .await?;

        // Workers fall back to polling if NOTIFY fails.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
            .bind(JOB_NOTIFY_CHANNEL)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(error = %e, "Failed to send pg_notify for new job");
        }

        tx.commit().await?;

        tracing::debug!("Job inserted");
        row.try_into()
    }

    #[tracing::instrument(skip(self))]
    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let next: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM jobs
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id,)) = next else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let row: JobRow = sqlx::query_as::<Postgres, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let job: Job = row.try_into()?;
        tracing::debug!(job_id = %job.id, kind = %job.kind(), "Job claimed");
        Ok(Some(job))
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
        let row: Option<JobRow> = sqlx::query_as::<Postgres, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as::<Postgres, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE status = $1 ORDER BY created_at ASC",
            JOB_COLUMNS
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn fail_stale_running(&self, grace: chrono::Duration) -> Result<Vec<Uuid>, StoreError> {
        let reaped: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'failed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
                AND started_at <= NOW() - make_interval(secs => $1)
            RETURNING id
            "#,
        )
        .bind(grace.num_seconds() as f64)
        .bind(stale_result(grace))
        .fetch_all(&self.pool)
        .await?;

        if !reaped.is_empty() {
            tracing::warn!(count = reaped.len(), "Reaped stale running jobs");
        }
        Ok(reaped.into_iter().map(|(id,)| id).collect())
    }
}
