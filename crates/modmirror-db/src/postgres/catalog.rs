use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use modmirror_core::models::{CatalogEntry, DownloadState};

use super::{size_from_db, size_to_db};
use crate::traits::ArchiveCatalog;
use crate::StoreError;

type CatalogRow = (String, String, i64, serde_json::Value, DateTime<Utc>);

fn entry_from_row((name, hash, size, state, registered_at): CatalogRow) -> Result<CatalogEntry, StoreError> {
    let state: DownloadState = serde_json::from_value(state)?;
    Ok(CatalogEntry {
        name,
        hash,
        size: size_from_db(size)?,
        state,
        registered_at,
    })
}

#[derive(Clone)]
pub struct PgArchiveCatalog {
    pool: PgPool,
}

impl PgArchiveCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArchiveCatalog for PgArchiveCatalog {
    #[tracing::instrument(skip(self, entry), fields(archive.name = %entry.name, archive.hash = %entry.hash))]
    async fn register(&self, entry: CatalogEntry) -> Result<bool, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO archive_catalog (name, hash, size, state, registered_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name, hash) DO NOTHING
            "#,
        )
        .bind(&entry.name)
        .bind(&entry.hash)
        .bind(size_to_db(entry.size)?)
        .bind(serde_json::to_value(&entry.state)?)
        .bind(entry.registered_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn get(&self, name: &str, hash: &str) -> Result<Option<CatalogEntry>, StoreError> {
        let row: Option<CatalogRow> = sqlx::query_as(
            r#"
            SELECT name, hash, size, state, registered_at
            FROM archive_catalog
            WHERE name = $1 AND hash = $2
            "#,
        )
        .bind(name)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        let rows: Vec<CatalogRow> = sqlx::query_as(
            "SELECT name, hash, size, state, registered_at FROM archive_catalog ORDER BY registered_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}
