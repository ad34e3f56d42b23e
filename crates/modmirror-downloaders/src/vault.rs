//! Credential vault
//!
//! One encrypted file per service under the vault directory. Reads and writes
//! for the same service are serialized through a per-service async lock, so two
//! logins finishing at once cannot interleave their writes.

use modmirror_core::models::LoginArtifact;
use modmirror_core::{AppError, EncryptionService};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};

const VAULT_EXTENSION: &str = "vault";

pub struct CredentialVault {
    dir: PathBuf,
    encryption: EncryptionService,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    signals: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl CredentialVault {
    /// Open (and create if needed) a vault rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>, encryption: EncryptionService) -> Result<Self, AppError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(vault_dir = %dir.display(), "Credential vault opened");
        Ok(Self {
            dir,
            encryption,
            locks: Mutex::new(HashMap::new()),
            signals: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn get(&self, service: &str) -> Result<Option<LoginArtifact>, AppError> {
        let path = self.path_for(service)?;
        let _guard = self.lock(service).await;

        let encrypted = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(self.encryption.decrypt_json(&encrypted)?))
    }

    pub async fn put(&self, service: &str, artifact: &LoginArtifact) -> Result<(), AppError> {
        let path = self.path_for(service)?;
        let encrypted = self.encryption.encrypt_json(artifact)?;
        let _guard = self.lock(service).await;

        let staging = path.with_file_name(format!(".{}.{}.tmp", service, VAULT_EXTENSION));
        tokio::fs::write(&staging, encrypted.as_bytes()).await?;
        tokio::fs::rename(&staging, &path).await?;

        self.signal(service, true);
        tracing::info!(service = %service, "Login stored in vault");
        Ok(())
    }

    /// Remove a stored login. Returns whether one existed.
    pub async fn delete(&self, service: &str) -> Result<bool, AppError> {
        let path = self.path_for(service)?;
        let _guard = self.lock(service).await;

        let existed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        self.signal(service, false);
        if existed {
            tracing::info!(service = %service, "Login removed from vault");
        }
        Ok(existed)
    }

    pub async fn exists(&self, service: &str) -> Result<bool, AppError> {
        let path = self.path_for(service)?;
        let _guard = self.lock(service).await;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Observable "logged in" flag for `service`, updated on every put/delete.
    pub fn is_logged_in(&self, service: &str) -> watch::Receiver<bool> {
        let mut signals = self
            .signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        signals
            .entry(service.to_string())
            .or_insert_with(|| {
                let present = self
                    .path_for(service)
                    .map(|path| path.is_file())
                    .unwrap_or(false);
                watch::channel(present).0
            })
            .subscribe()
    }

    fn signal(&self, service: &str, logged_in: bool) {
        let signals = self
            .signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = signals.get(service) {
            sender.send_replace(logged_in);
        }
    }

    async fn lock(&self, service: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn path_for(&self, service: &str) -> Result<PathBuf, AppError> {
        let valid = !service.is_empty()
            && !service.starts_with('.')
            && service
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(AppError::InvalidInput(format!(
                "Invalid vault service name: {:?}",
                service
            )));
        }
        Ok(self.dir.join(format!("{}.{}", service, VAULT_EXTENSION)))
    }
}
