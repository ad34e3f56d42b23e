#[cfg(feature = "storage-local")]
use crate::LocalMirror;
#[cfg(feature = "storage-s3")]
use crate::S3Mirror;
use crate::{MirrorBackend, MirrorStorage, StorageError, StorageResult};
use modmirror_core::config::MirrorConfig;
use std::sync::Arc;

/// Create a mirror backend based on configuration
pub async fn create_mirror(config: &MirrorConfig) -> StorageResult<Arc<dyn MirrorStorage>> {
    match config.backend {
        #[cfg(feature = "storage-s3")]
        MirrorBackend::S3 => {
            let bucket = config.s3_bucket.clone().ok_or_else(|| {
                StorageError::ConfigError("MIRROR_S3_BUCKET not configured".to_string())
            })?;
            let region = config.s3_region.clone().ok_or_else(|| {
                StorageError::ConfigError("MIRROR_S3_REGION not configured".to_string())
            })?;

            let mirror = S3Mirror::new(
                bucket,
                region,
                config.s3_endpoint.clone(),
                config.public_base_url.clone(),
            )
            .await?;
            Ok(Arc::new(mirror))
        }

        #[cfg(not(feature = "storage-s3"))]
        MirrorBackend::S3 => Err(StorageError::ConfigError(
            "S3 mirror backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        MirrorBackend::Local => {
            let base_path = config.local_path.clone().ok_or_else(|| {
                StorageError::ConfigError("MIRROR_LOCAL_PATH not configured".to_string())
            })?;
            let base_url = config.public_base_url.clone().ok_or_else(|| {
                StorageError::ConfigError("MIRROR_PUBLIC_BASE_URL not configured".to_string())
            })?;

            let mirror = LocalMirror::new(base_path, base_url).await?;
            Ok(Arc::new(mirror))
        }

        #[cfg(not(feature = "storage-local"))]
        MirrorBackend::Local => Err(StorageError::ConfigError(
            "Local mirror backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
