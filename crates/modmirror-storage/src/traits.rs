//! Mirror storage abstraction trait

use crate::MirrorBackend;
use async_trait::async_trait;
use modmirror_core::ThrottledProgress;
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid remote name: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Content-delivery mirror.
///
/// `upload` streams the file; no implementation holds a whole archive in
/// memory.
#[async_trait]
pub trait MirrorStorage: Send + Sync {
    /// Push `local_path` to the mirror under `remote_name` and return its
    /// public URL. Progress is reported through `progress` as bytes move.
    async fn upload(
        &self,
        local_path: &Path,
        remote_name: &str,
        progress: &ThrottledProgress,
    ) -> StorageResult<Url>;

    /// Public URL `remote_name` is (or would be) served from.
    fn public_url(&self, remote_name: &str) -> StorageResult<Url>;

    /// Prefix every public URL of this mirror starts with.
    fn public_base(&self) -> &Url;

    fn backend_type(&self) -> MirrorBackend;
}

/// Reject names that could escape the mirror root.
pub fn validate_remote_name(remote_name: &str) -> StorageResult<()> {
    if remote_name.is_empty() {
        return Err(StorageError::InvalidKey("Remote name is empty".to_string()));
    }
    if remote_name.starts_with('/') || remote_name.contains('\\') {
        return Err(StorageError::InvalidKey(
            "Remote name must be a relative, '/'-separated path".to_string(),
        ));
    }
    if remote_name.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty()) {
        return Err(StorageError::InvalidKey(
            "Remote name contains invalid path segments".to_string(),
        ));
    }
    Ok(())
}

/// Join a remote name onto a public base, percent-encoding each segment.
pub(crate) fn join_public_url(base: &Url, remote_name: &str) -> StorageResult<Url> {
    validate_remote_name(remote_name)?;
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| StorageError::ConfigError(format!("Base URL {} cannot hold a path", base)))?;
        segments.pop_if_empty();
        for segment in remote_name.split('/') {
            segments.push(segment);
        }
    }
    Ok(url)
}
