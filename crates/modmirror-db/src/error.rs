use modmirror_core::models::JobStatus;
use modmirror_core::{ErrorMetadata, LogLevel};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// The job already left `running`; its recorded outcome is final.
    #[error("job {id} is already {status}")]
    Conflict { id: Uuid, status: JobStatus },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StoreError::NotFound { entity, id }
    }
}

impl ErrorMetadata for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "STORE_NOT_FOUND",
            StoreError::Conflict { .. } => "STORE_CONFLICT",
            StoreError::Database(_) => "STORE_DATABASE_ERROR",
            StoreError::Migration(_) => "STORE_MIGRATION_ERROR",
            StoreError::Serialization(_) => "STORE_SERIALIZATION_ERROR",
            StoreError::Corrupt(_) => "STORE_CORRUPT_ROW",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }

    fn suggested_action(&self) -> Option<&'static str> {
        match self {
            StoreError::Database(_) => Some("Check database connectivity and retry"),
            StoreError::Migration(_) => Some("Inspect the migration history"),
            _ => None,
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            StoreError::NotFound { .. } | StoreError::Conflict { .. } => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}
