use crate::traits::{join_public_url, validate_remote_name, MirrorStorage, StorageError, StorageResult};
use crate::MirrorBackend;
use async_trait::async_trait;
use modmirror_core::ThrottledProgress;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, ObjectStoreExt, WriteMultipart};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncReadExt;
use url::Url;

/// Size of each multipart part read from disk.
const PART_SIZE: usize = 8 * 1024 * 1024;
/// Parts allowed in flight before the reader waits.
const MAX_CONCURRENT_PARTS: usize = 4;

/// S3-compatible mirror
#[derive(Clone)]
pub struct S3Mirror {
    store: Arc<AmazonS3>,
    bucket: String,
    public_base: Url,
}

impl S3Mirror {
    /// Create a new S3Mirror instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    /// * `public_base` - Optional CDN base; defaults to the bucket's own URL
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        public_base: Option<Url>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region.clone())
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let public_base = match public_base {
            Some(base) => base,
            None => Self::default_public_base(&bucket, &region, endpoint_url.as_deref())?,
        };

        Ok(S3Mirror {
            store: Arc::new(store),
            bucket,
            public_base,
        })
    }

    /// Path-style for custom endpoints, virtual-hosted style for AWS.
    fn default_public_base(
        bucket: &str,
        region: &str,
        endpoint_url: Option<&str>,
    ) -> StorageResult<Url> {
        let base = match endpoint_url {
            Some(endpoint) => format!("{}/{}/", endpoint.trim_end_matches('/'), bucket),
            None => format!("https://{}.s3.{}.amazonaws.com/", bucket, region),
        };
        Url::parse(&base).map_err(|e| StorageError::ConfigError(format!("Invalid S3 URL {}: {}", base, e)))
    }

    async fn stream_file(
        &self,
        local_path: &Path,
        location: &ObjectPath,
        progress: &ThrottledProgress,
    ) -> StorageResult<u64> {
        let mut file = fs::File::open(local_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StorageError::NotFound(local_path.display().to_string())
            }
            _ => StorageError::IoError(e),
        })?;
        let total = file.metadata().await?.len();

        let upload = self
            .store
            .put_multipart(location)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, PART_SIZE);

        let mut buffer = vec![0u8; PART_SIZE];
        let mut sent = 0u64;
        loop {
            let read = match file.read(&mut buffer).await {
                Ok(read) => read,
                Err(e) => {
                    writer.abort().await.ok();
                    return Err(StorageError::IoError(e));
                }
            };
            if read == 0 {
                break;
            }
            if let Err(e) = writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await {
                writer.abort().await.ok();
                return Err(StorageError::UploadFailed(e.to_string()));
            }
            writer.write(&buffer[..read]);
            sent += read as u64;
            progress.bytes(sent, Some(total));
        }

        writer
            .finish()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        Ok(sent)
    }
}

#[async_trait]
impl MirrorStorage for S3Mirror {
    async fn upload(
        &self,
        local_path: &Path,
        remote_name: &str,
        progress: &ThrottledProgress,
    ) -> StorageResult<Url> {
        validate_remote_name(remote_name)?;
        let url = self.public_url(remote_name)?;
        let location = ObjectPath::from(remote_name.to_string());
        let start = std::time::Instant::now();

        let size = self
            .stream_file(local_path, &location, progress)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %remote_name,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 mirror upload failed"
                );
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %remote_name,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 mirror upload successful"
        );

        Ok(url)
    }

    fn public_url(&self, remote_name: &str) -> StorageResult<Url> {
        join_public_url(&self.public_base, remote_name)
    }

    fn public_base(&self) -> &Url {
        &self.public_base
    }

    fn backend_type(&self) -> MirrorBackend {
        MirrorBackend::S3
    }
}
