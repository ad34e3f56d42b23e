//! Interactive login broker
//!
//! When a protocol needs a login the vault does not hold, the broker publishes
//! a [`LoginRequest`] and parks the caller until whoever consumes the event
//! calls [`LoginBroker::resume`] or [`LoginBroker::cancel`]. Requests are keyed
//! by service: concurrent callers for the same service share one request and
//! one outcome, so the user is prompted once.

use futures::future::{BoxFuture, FutureExt, Shared};
use modmirror_core::models::LoginArtifact;
use modmirror_core::AppError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use crate::error::DownloadError;
use crate::vault::CredentialVault;

/// Identifies one outstanding login request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoginHandle(Uuid);

impl fmt::Display for LoginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event published when a service needs a login.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub handle: LoginHandle,
    pub service: String,
}

/// Terminal outcome of a login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Resolved(LoginArtifact),
    Canceled,
    /// Nobody will ever answer: the event consumer is gone or the broker
    /// shut down with the request still open.
    Abandoned,
}

type SharedOutcome = Shared<BoxFuture<'static, LoginOutcome>>;

struct PendingLogin {
    handle: LoginHandle,
    responder: oneshot::Sender<LoginOutcome>,
    outcome: SharedOutcome,
}

struct BrokerInner {
    vault: Arc<CredentialVault>,
    events: mpsc::UnboundedSender<LoginRequest>,
    pending: Mutex<HashMap<String, PendingLogin>>,
}

#[derive(Clone)]
pub struct LoginBroker {
    inner: Arc<BrokerInner>,
}

impl LoginBroker {
    /// Create a broker and the receiving end of its login events.
    pub fn new(vault: Arc<CredentialVault>) -> (Self, mpsc::UnboundedReceiver<LoginRequest>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let broker = Self {
            inner: Arc::new(BrokerInner {
                vault,
                events,
                pending: Mutex::new(HashMap::new()),
            }),
        };
        (broker, receiver)
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.inner.vault
    }

    /// Get the login for `service`, asking for one if the vault has none.
    pub async fn request_login(&self, service: &str) -> Result<LoginArtifact, DownloadError> {
        if let Some(artifact) = self.inner.vault.get(service).await? {
            return Ok(artifact);
        }

        match self.wait_for(service).await? {
            LoginOutcome::Resolved(artifact) => Ok(artifact),
            outcome => {
                tracing::info!(service = %service, outcome = ?outcome, "Login not provided");
                Err(DownloadError::LoginCanceled {
                    service: service.to_string(),
                })
            }
        }
    }

    /// Join (or open) the request for `service` and wait for its outcome.
    pub async fn wait_for(&self, service: &str) -> Result<LoginOutcome, AppError> {
        let outcome = {
            let mut pending = self.inner.pending.lock().await;
            if let Some(existing) = pending.get(service) {
                existing.outcome.clone()
            } else {
                // A resume may have landed between the caller's vault check and here.
                if let Some(artifact) = self.inner.vault.get(service).await? {
                    return Ok(LoginOutcome::Resolved(artifact));
                }

                let (responder, receiver) = oneshot::channel();
                let outcome = receiver
                    .map(|received| received.unwrap_or(LoginOutcome::Abandoned))
                    .boxed()
                    .shared();
                let handle = LoginHandle(Uuid::new_v4());
                let request = LoginRequest {
                    handle,
                    service: service.to_string(),
                };

                if self.inner.events.send(request).is_err() {
                    tracing::warn!(service = %service, "No login handler is listening");
                    drop(responder);
                    return Ok(outcome.await);
                }

                tracing::info!(service = %service, handle = %handle, "Login requested");
                pending.insert(
                    service.to_string(),
                    PendingLogin {
                        handle,
                        responder,
                        outcome: outcome.clone(),
                    },
                );
                outcome
            }
        };

        Ok(outcome.await)
    }

    /// Answer a request. The artifact is written to the vault before any
    /// waiter is released. Returns false if the handle is no longer open.
    pub async fn resume(&self, handle: LoginHandle, artifact: LoginArtifact) -> Result<bool, AppError> {
        let mut pending = self.inner.pending.lock().await;
        let Some(service) = Self::service_for(&pending, handle) else {
            return Ok(false);
        };

        self.inner.vault.put(&service, &artifact).await?;

        if let Some(entry) = pending.remove(&service) {
            let _ = entry.responder.send(LoginOutcome::Resolved(artifact));
        }
        tracing::info!(service = %service, handle = %handle, "Login resumed");
        Ok(true)
    }

    /// Decline a request. Every waiter observes cancellation.
    pub async fn cancel(&self, handle: LoginHandle) -> bool {
        let mut pending = self.inner.pending.lock().await;
        let Some(service) = Self::service_for(&pending, handle) else {
            return false;
        };

        if let Some(entry) = pending.remove(&service) {
            let _ = entry.responder.send(LoginOutcome::Canceled);
        }
        tracing::info!(service = %service, handle = %handle, "Login canceled");
        true
    }

    /// Drop every open request. Waiters observe [`LoginOutcome::Abandoned`].
    pub async fn abandon_all(&self) -> usize {
        let mut pending = self.inner.pending.lock().await;
        let count = pending.len();
        pending.clear();
        if count > 0 {
            tracing::warn!(count, "Abandoned open login requests");
        }
        count
    }

    #[cfg(test)]
    pub(crate) async fn pending_services(&self) -> Vec<String> {
        self.inner.pending.lock().await.keys().cloned().collect()
    }

    fn service_for(pending: &HashMap<String, PendingLogin>, handle: LoginHandle) -> Option<String> {
        pending
            .iter()
            .find(|(_, entry)| entry.handle == handle)
            .map(|(service, _)| service.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modmirror_core::EncryptionService;
    use std::time::Duration;

    async fn test_broker(
        dir: &std::path::Path,
    ) -> (LoginBroker, mpsc::UnboundedReceiver<LoginRequest>) {
        let encryption =
            EncryptionService::from_key_bytes(b"01234567890123456789012345678901").unwrap();
        let vault = Arc::new(CredentialVault::open(dir, encryption).await.unwrap());
        LoginBroker::new(vault)
    }

    #[tokio::test]
    async fn existing_login_resolves_without_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (broker, mut events) = test_broker(dir.path()).await;
        let artifact = LoginArtifact::new("b");
        broker.vault().put("svc", &artifact).await.unwrap();

        assert_eq!(broker.request_login("svc").await.unwrap(), artifact);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (broker, mut events) = test_broker(dir.path()).await;

        let first = tokio::spawn({
            let broker = broker.clone();
            async move { broker.request_login("svc").await }
        });
        let second = tokio::spawn({
            let broker = broker.clone();
            async move { broker.request_login("svc").await }
        });

        let request = events.recv().await.unwrap();
        assert_eq!(request.service, "svc");

        // Let both callers park on the request before answering.
        while broker.pending_services().await.is_empty() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let artifact = LoginArtifact::new("body").with_header("x-a", "1");
        assert!(broker.resume(request.handle, artifact.clone()).await.unwrap());

        assert_eq!(first.await.unwrap().unwrap(), artifact);
        assert_eq!(second.await.unwrap().unwrap(), artifact);
        assert!(events.try_recv().is_err(), "second prompt was published");
        assert_eq!(broker.vault().get("svc").await.unwrap(), Some(artifact));
    }

    #[tokio::test]
    async fn cancel_fans_out_to_every_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let (broker, mut events) = test_broker(dir.path()).await;

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let broker = broker.clone();
                tokio::spawn(async move { broker.request_login("svc").await })
            })
            .collect();

        let request = events.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker.cancel(request.handle).await);
        assert!(!broker.cancel(request.handle).await);

        for waiter in waiters {
            assert!(matches!(
                waiter.await.unwrap(),
                Err(DownloadError::LoginCanceled { .. })
            ));
        }
        assert!(!broker.vault().exists("svc").await.unwrap());
    }

    #[tokio::test]
    async fn abandoned_requests_read_as_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let (broker, mut events) = test_broker(dir.path()).await;

        let waiter = tokio::spawn({
            let broker = broker.clone();
            async move { broker.wait_for("svc").await }
        });
        events.recv().await.unwrap();
        while broker.pending_services().await.is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(broker.abandon_all().await, 1);
        assert_eq!(waiter.await.unwrap().unwrap(), LoginOutcome::Abandoned);
    }

    #[tokio::test]
    async fn no_listener_means_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let (broker, events) = test_broker(dir.path()).await;
        drop(events);

        assert!(matches!(
            broker.request_login("svc").await,
            Err(DownloadError::LoginCanceled { .. })
        ));
        assert!(broker.pending_services().await.is_empty());
    }

    #[tokio::test]
    async fn resume_with_unknown_handle_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (broker, _events) = test_broker(dir.path()).await;
        let resumed = broker
            .resume(LoginHandle(Uuid::new_v4()), LoginArtifact::new("b"))
            .await
            .unwrap();
        assert!(!resumed);
    }
}
