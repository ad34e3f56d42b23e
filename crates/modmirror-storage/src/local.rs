use crate::traits::{join_public_url, validate_remote_name, MirrorStorage, StorageError, StorageResult};
use crate::MirrorBackend;
use async_trait::async_trait;
use modmirror_core::ThrottledProgress;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Local filesystem mirror, served by some external web server from
/// `base_path` at `base_url`.
#[derive(Clone)]
pub struct LocalMirror {
    base_path: PathBuf,
    base_url: Url,
}

impl LocalMirror {
    /// Create a new LocalMirror instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory of the mirror (e.g., "/srv/mirror")
    /// * `base_url` - URL the root directory is served at (e.g., "https://mirror.example/files/")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: Url) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create mirror directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalMirror {
            base_path,
            base_url,
        })
    }

    /// Convert a remote name to a filesystem path with traversal checks
    fn key_to_path(&self, remote_name: &str) -> StorageResult<PathBuf> {
        validate_remote_name(remote_name)?;

        let path = self.base_path.join(remote_name);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        // Existing targets may be symlinks; resolve and re-check.
        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Remote name resolves outside mirror directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    async fn copy_with_progress(
        &self,
        local_path: &Path,
        temp_path: &Path,
        progress: &ThrottledProgress,
    ) -> StorageResult<u64> {
        let mut source = fs::File::open(local_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StorageError::NotFound(local_path.display().to_string())
            }
            _ => StorageError::IoError(e),
        })?;
        let total = source.metadata().await?.len();
        let mut target = fs::File::create(temp_path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            let read = source.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            target.write_all(&buffer[..read]).await?;
            copied += read as u64;
            progress.bytes(copied, Some(total));
        }
        target.sync_all().await?;
        Ok(copied)
    }
}

#[async_trait]
impl MirrorStorage for LocalMirror {
    async fn upload(
        &self,
        local_path: &Path,
        remote_name: &str,
        progress: &ThrottledProgress,
    ) -> StorageResult<Url> {
        let path = self.key_to_path(remote_name)?;
        let url = self.public_url(remote_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let start = std::time::Instant::now();
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".partial");
        let temp_path = PathBuf::from(temp_path);

        let size = match self.copy_with_progress(local_path, &temp_path, progress).await {
            Ok(size) => size,
            Err(e) => {
                fs::remove_file(&temp_path).await.ok();
                return Err(e);
            }
        };
        fs::rename(&temp_path, &path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to move file into place {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %remote_name,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local mirror upload successful"
        );

        Ok(url)
    }

    fn public_url(&self, remote_name: &str) -> StorageResult<Url> {
        join_public_url(&self.base_url, remote_name)
    }

    fn public_base(&self) -> &Url {
        &self.base_url
    }

    fn backend_type(&self) -> MirrorBackend {
        MirrorBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modmirror_core::TransferProgress;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn silent_progress() -> ThrottledProgress {
        ThrottledProgress::new("test", Arc::new(|_: &TransferProgress| {}))
    }

    #[tokio::test]
    async fn upload_copies_file_and_returns_public_url() {
        let mirror_dir = tempdir().unwrap();
        let source_dir = tempdir().unwrap();
        let source = source_dir.path().join("mod.7z");
        tokio::fs::write(&source, b"archive bytes").await.unwrap();

        let mirror = LocalMirror::new(
            mirror_dir.path(),
            Url::parse("https://mirror.example/files/").unwrap(),
        )
        .await
        .unwrap();

        let url = mirror
            .upload(&source, "mods/mod.7z", &silent_progress())
            .await
            .unwrap();
        assert_eq!(url.as_str(), "https://mirror.example/files/mods/mod.7z");
        let stored = tokio::fs::read(mirror_dir.path().join("mods/mod.7z"))
            .await
            .unwrap();
        assert_eq!(stored, b"archive bytes");
    }

    #[tokio::test]
    async fn upload_reports_progress() {
        let mirror_dir = tempdir().unwrap();
        let source = mirror_dir.path().join("src.bin");
        tokio::fs::write(&source, vec![7u8; 4096]).await.unwrap();
        let mirror = LocalMirror::new(
            mirror_dir.path().join("out"),
            Url::parse("https://mirror.example/").unwrap(),
        )
        .await
        .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let progress = ThrottledProgress::with_interval(
            "src.bin",
            Arc::new(move |p: &TransferProgress| sink_seen.lock().unwrap().push(p.percent)),
            std::time::Duration::ZERO,
        );
        mirror.upload(&source, "src.bin", &progress).await.unwrap();
        assert_eq!(seen.lock().unwrap().last(), Some(&100));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let mirror_dir = tempdir().unwrap();
        let mirror = LocalMirror::new(
            mirror_dir.path(),
            Url::parse("https://mirror.example/").unwrap(),
        )
        .await
        .unwrap();

        let err = mirror
            .upload(Path::new("/etc/hosts"), "../escape", &silent_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));

        let err = mirror
            .upload(Path::new("/etc/hosts"), "/etc/passwd", &silent_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn missing_source_leaves_nothing_behind() {
        let mirror_dir = tempdir().unwrap();
        let mirror = LocalMirror::new(
            mirror_dir.path(),
            Url::parse("https://mirror.example/").unwrap(),
        )
        .await
        .unwrap();

        let err = mirror
            .upload(
                &mirror_dir.path().join("nope.7z"),
                "nope.7z",
                &silent_progress(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!mirror_dir.path().join("nope.7z").exists());
    }
}
