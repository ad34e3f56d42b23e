use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use modmirror_core::models::UploadRecord;

use super::{size_from_db, size_to_db};
use crate::traits::UploadStore;
use crate::StoreError;

#[derive(Clone)]
pub struct PgUploadStore {
    pool: PgPool,
}

impl PgUploadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadStore for PgUploadStore {
    #[tracing::instrument(skip(self, record), fields(upload.id = %record.id))]
    async fn insert(&self, record: UploadRecord) -> Result<UploadRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO uploads (id, local_name, size, hash, source_uri)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.local_name)
        .bind(size_to_db(record.size)?)
        .bind(&record.hash)
        .bind(&record.source_uri)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, StoreError> {
        let row: Option<(Uuid, String, i64, String, String)> = sqlx::query_as(
            "SELECT id, local_name, size, hash, source_uri FROM uploads WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, local_name, size, hash, source_uri)| {
            Ok(UploadRecord {
                id,
                local_name,
                size: size_from_db(size)?,
                hash,
                source_uri,
            })
        })
        .transpose()
    }
}
