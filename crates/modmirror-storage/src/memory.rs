//! In-memory mirror for tests and dry runs.

use crate::traits::{join_public_url, validate_remote_name, MirrorStorage, StorageError, StorageResult};
use crate::MirrorBackend;
use async_trait::async_trait;
use bytes::Bytes;
use modmirror_core::ThrottledProgress;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

#[derive(Clone)]
pub struct MemoryMirror {
    files: Arc<Mutex<HashMap<String, Bytes>>>,
    base_url: Url,
    fail_uploads: Arc<AtomicBool>,
}

impl MemoryMirror {
    pub fn new(base_url: Url) -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            base_url,
            fail_uploads: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent upload fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.fail_uploads.store(failing, Ordering::SeqCst);
    }

    pub async fn get(&self, remote_name: &str) -> Option<Bytes> {
        self.files.lock().await.get(remote_name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.files.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.lock().await.is_empty()
    }
}

#[async_trait]
impl MirrorStorage for MemoryMirror {
    async fn upload(
        &self,
        local_path: &Path,
        remote_name: &str,
        progress: &ThrottledProgress,
    ) -> StorageResult<Url> {
        validate_remote_name(remote_name)?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::BackendError(
                "memory mirror is set to fail".to_string(),
            ));
        }
        let data = tokio::fs::read(local_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StorageError::NotFound(local_path.display().to_string())
            }
            _ => StorageError::IoError(e),
        })?;
        let size = data.len() as u64;
        progress.bytes(size, Some(size));
        self.files
            .lock()
            .await
            .insert(remote_name.to_string(), Bytes::from(data));
        self.public_url(remote_name)
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
