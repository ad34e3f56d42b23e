use modmirror_core::EncryptionService;
use std::path::Path;
use std::sync::Arc;

use crate::broker::LoginBroker;
use crate::context::DownloadContext;
use crate::vault::CredentialVault;

pub(crate) const TEST_KEY: &[u8; 32] = b"01234567890123456789012345678901";

pub(crate) async fn test_vault(dir: &Path) -> Arc<CredentialVault> {
    let encryption = EncryptionService::from_key_bytes(TEST_KEY).unwrap();
    Arc::new(CredentialVault::open(dir.join("vault"), encryption).await.unwrap())
}

/// Context whose broker has no listener: any login prompt is abandoned.
pub(crate) async fn test_context(dir: &Path) -> DownloadContext {
    let (broker, _events) = LoginBroker::new(test_vault(dir).await);
    DownloadContext::new(reqwest::Client::new(), broker)
}
