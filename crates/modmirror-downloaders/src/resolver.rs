//! Acquisition orchestrator
//!
//! Drives one archive through recognize, policy check, login preparation,
//! fetch and integrity verification. Protocol details stay behind
//! [`Acquire`]; this module only sequences the calls.

use modmirror_core::models::{Archive, DownloadState};
use modmirror_core::Descriptor;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::hashing::{hash_file, ContentDigest};
use crate::state::{self, Acquire};
use crate::DEPOT_SERVICE;

#[derive(Clone)]
pub struct Resolver {
    ctx: DownloadContext,
}

impl Resolver {
    pub fn new(ctx: DownloadContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &DownloadContext {
        &self.ctx
    }

    /// First protocol that claims the descriptor.
    pub fn recognize(&self, descriptor: &Descriptor) -> Option<DownloadState> {
        state::recognize(descriptor)
    }

    /// Fetch `state` to `destination` and report what landed there.
    ///
    /// A stored login the host rejects is discarded and requested again once.
    pub async fn fetch_state(
        &self,
        state: &DownloadState,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<ContentDigest, DownloadError> {
        let started = Instant::now();

        if !state.is_permitted(&self.ctx.whitelist) {
            tracing::warn!(
                protocol = state.protocol(),
                source = %state.describe_for_report(),
                "Source rejected by whitelist"
            );
            return Err(DownloadError::NotPermitted(state.describe_for_report()));
        }

        state.prepare(&self.ctx).await?;
        match state.fetch(&self.ctx, destination, cancel).await {
            Err(e) if e.needs_login() => {
                let service = login_service(state).unwrap_or_default();
                tracing::info!(
                    protocol = state.protocol(),
                    service = %service,
                    error = %e,
                    "Login rejected, requesting a new one"
                );
                if !service.is_empty() {
                    self.ctx.vault().delete(service).await?;
                }
                state.prepare(&self.ctx).await?;
                state.fetch(&self.ctx, destination, cancel).await?;
            }
            other => other?,
        }

        let digest = hash_file(destination).await?;
        tracing::info!(
            protocol = state.protocol(),
            destination = %destination.display(),
            size = digest.size,
            hash = %digest.hash,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Archive fetched"
        );
        Ok(digest)
    }

    /// Fetch an archive and check it against its declared size and hash. On a
    /// mismatch the file is removed.
    pub async fn acquire(
        &self,
        archive: &Archive,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<ContentDigest, DownloadError> {
        let digest = self.fetch_state(&archive.state, destination, cancel).await?;

        let mismatch = if digest.size != archive.size {
            Some((format!("{} bytes", archive.size), format!("{} bytes", digest.size)))
        } else if !digest.hash.eq_ignore_ascii_case(&archive.hash) {
            Some((archive.hash.clone(), digest.hash.clone()))
        } else {
            None
        };

        if let Some((expected, actual)) = mismatch {
            tracing::error!(
                archive = %archive.name,
                expected = %expected,
                actual = %actual,
                "Archive failed integrity check"
            );
            if let Err(e) = tokio::fs::remove_file(destination).await {
                tracing::warn!(path = %destination.display(), error = %e, "Failed to remove corrupt archive");
            }
            return Err(DownloadError::Integrity { expected, actual });
        }

        Ok(digest)
    }

    pub async fn verify(&self, state: &DownloadState) -> Result<bool, DownloadError> {
        if !state.is_permitted(&self.ctx.whitelist) {
            return Err(DownloadError::NotPermitted(state.describe_for_report()));
        }
        state.prepare(&self.ctx).await?;
        state.verify(&self.ctx).await
    }
}

fn login_service(state: &DownloadState) -> Option<&'static str> {
    match state {
        DownloadState::Depot(_) => Some(DEPOT_SERVICE),
        DownloadState::Http(_) | DownloadState::Mirror(_) => None,
    }
}
