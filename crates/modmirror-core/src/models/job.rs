use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::archive::Archive;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 3,
    #[default]
    Normal = 5,
    High = 7,
}

impl JobPriority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            i32::MIN..=3 => JobPriority::Low,
            4..=6 => JobPriority::Normal,
            _ => JobPriority::High,
        }
    }
}

impl From<JobPriority> for i32 {
    fn from(priority: JobPriority) -> Self {
        priority as i32
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_status", rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// Discriminant of [`JobPayload`], used for rate limiting and log fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    UploadToMirror,
    IndexArchive,
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobKind::UploadToMirror => write!(f, "upload_to_mirror"),
            JobKind::IndexArchive => write!(f, "index_archive"),
        }
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload_to_mirror" => Ok(JobKind::UploadToMirror),
            "index_archive" => Ok(JobKind::IndexArchive),
            _ => Err(anyhow::anyhow!("Invalid job kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    UploadToMirror { file_id: Uuid },
    IndexArchive { archive: Archive },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::UploadToMirror { .. } => JobKind::UploadToMirror,
            JobPayload::IndexArchive { .. } => JobKind::IndexArchive,
        }
    }

    pub fn description(&self) -> String {
        match self {
            JobPayload::UploadToMirror { file_id } => format!("Upload file {} to mirror", file_id),
            JobPayload::IndexArchive { archive } => {
                format!("Index archive {} ({})", archive.name, archive.hash)
            }
        }
    }
}

/// A durable unit of queued work. Jobs are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub priority: JobPriority,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn new(payload: JobPayload, priority: JobPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority,
            payload,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// True when the job has been `Running` for at least `grace` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        self.status == JobStatus::Running
            && self
                .started_at
                .map(|started| now.signed_duration_since(started) >= grace)
                .unwrap_or(false)
    }
}
