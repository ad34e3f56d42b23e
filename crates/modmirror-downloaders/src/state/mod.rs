//! Protocol behaviour for download states
//!
//! [`DownloadState`] is a closed enum defined in core. This module gives every
//! variant the same two capabilities:
//!
//! - [`Recognize`]: a pure, total match over a descriptor's fields
//! - [`Acquire`]: policy check, login preparation, fetch, verify and a report line
//!
//! The impls for `DownloadState` itself only dispatch; adding a protocol means
//! adding a variant and the compiler points at every match that must learn it.

use async_trait::async_trait;
use modmirror_core::models::DownloadState;
use modmirror_core::Descriptor;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::whitelist::ServerWhitelist;

pub mod depot;
pub mod http;
pub mod mirror;
mod staging;

pub(crate) use staging::StagedFile;

/// Build a state from a descriptor, or `None` if the descriptor belongs to
/// another protocol. Never fails.
pub trait Recognize: Sized {
    fn recognize(descriptor: &Descriptor) -> Option<Self>;
}

#[async_trait]
pub trait Acquire: Send + Sync {
    /// Policy check, evaluated before any network access.
    fn is_permitted(&self, whitelist: &ServerWhitelist) -> bool;

    /// Make sure any login this protocol needs is present. Idempotent.
    async fn prepare(&self, ctx: &DownloadContext) -> Result<(), DownloadError>;

    /// Write the archive to `destination`. On error nothing is left at
    /// `destination`.
    async fn fetch(
        &self,
        ctx: &DownloadContext,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError>;

    /// Check that the source still resolves without downloading the payload.
    async fn verify(&self, ctx: &DownloadContext) -> Result<bool, DownloadError>;

    /// One-line human summary for output manifests.
    fn describe_for_report(&self) -> String;
}

/// Try every protocol in a fixed order and return the first match.
pub fn recognize(descriptor: &Descriptor) -> Option<DownloadState> {
    DownloadState::recognize(descriptor)
}

impl Recognize for DownloadState {
    fn recognize(descriptor: &Descriptor) -> Option<Self> {
        if let Some(state) = mirror::recognize(descriptor) {
            return Some(DownloadState::Mirror(state));
        }
        if let Some(state) = depot::recognize(descriptor) {
            return Some(DownloadState::Depot(state));
        }
        http::recognize(descriptor).map(DownloadState::Http)
    }
}

#[async_trait]
impl Acquire for DownloadState {
    fn is_permitted(&self, whitelist: &ServerWhitelist) -> bool {
        match self {
            DownloadState::Http(state) => state.is_permitted(whitelist),
            DownloadState::Mirror(state) => state.is_permitted(whitelist),
            DownloadState::Depot(state) => state.is_permitted(whitelist),
        }
    }

    async fn prepare(&self, ctx: &DownloadContext) -> Result<(), DownloadError> {
        match self {
            DownloadState::Http(state) => state.prepare(ctx).await,
            DownloadState::Mirror(state) => state.prepare(ctx).await,
            DownloadState::Depot(state) => state.prepare(ctx).await,
        }
    }

    async fn fetch(
        &self,
        ctx: &DownloadContext,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        match self {
            DownloadState::Http(state) => state.fetch(ctx, destination, cancel).await,
            DownloadState::Mirror(state) => state.fetch(ctx, destination, cancel).await,
            DownloadState::Depot(state) => state.fetch(ctx, destination, cancel).await,
        }
    }

    async fn verify(&self, ctx: &DownloadContext) -> Result<bool, DownloadError> {
        match self {
            DownloadState::Http(state) => state.verify(ctx).await,
            DownloadState::Mirror(state) => state.verify(ctx).await,
            DownloadState::Depot(state) => state.verify(ctx).await,
        }
    }

    fn describe_for_report(&self) -> String {
        match self {
            DownloadState::Http(state) => state.describe_for_report(),
            DownloadState::Mirror(state) => state.describe_for_report(),
            DownloadState::Depot(state) => state.describe_for_report(),
        }
    }
}
