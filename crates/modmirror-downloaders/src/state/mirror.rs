//! Copies this system republished to its own mirror
//!
//! Only the pipeline writes `mirroredName`/`mirrorURL`, so a descriptor that a
//! user wrote by hand is never recognized here.

use async_trait::async_trait;
use modmirror_core::models::{MirrorState, MIRRORED_NAME_KEY, MIRROR_URL_KEY};
use modmirror_core::Descriptor;
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{http, Acquire};
use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::whitelist::ServerWhitelist;

pub fn recognize(descriptor: &Descriptor) -> Option<MirrorState> {
    let remote_name = descriptor.get(MIRRORED_NAME_KEY)?;
    let url = Url::parse(descriptor.get(MIRROR_URL_KEY)?).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some(MirrorState {
        remote_name: remote_name.to_string(),
        url,
    })
}

#[async_trait]
impl Acquire for MirrorState {
    fn is_permitted(&self, whitelist: &ServerWhitelist) -> bool {
        whitelist.allows_mirror_url(&self.url)
    }

    async fn prepare(&self, _ctx: &DownloadContext) -> Result<(), DownloadError> {
        Ok(())
    }

    async fn fetch(
        &self,
        ctx: &DownloadContext,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        http::download_url(ctx, &self.url, &BTreeMap::new(), destination, cancel).await
    }

    async fn verify(&self, ctx: &DownloadContext) -> Result<bool, DownloadError> {
        http::head_ok(ctx, &self.url, &BTreeMap::new()).await
    }

    fn describe_for_report(&self) -> String {
        format!("Mirrored copy: {} at {}", self.remote_name, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    #[test]
    fn needs_both_pipeline_keys() {
        assert!(recognize(&Descriptor::parse("mirroredName=a.zip")).is_none());
        assert!(recognize(&Descriptor::parse("mirrorURL=https://cdn/a.zip")).is_none());
        let state =
            recognize(&Descriptor::parse("mirroredName=a.zip\nmirrorURL=https://cdn/a.zip")).unwrap();
        assert_eq!(state.remote_name, "a.zip");
    }

    #[tokio::test]
    async fn fetches_from_mirror() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/mods/a.zip")
            .with_status(200)
            .with_body("mirrored")
            .create_async()
            .await;

        let base = Url::parse(&format!("{}/mods/", server.url())).unwrap();
        let state = MirrorState {
            remote_name: "a.zip".into(),
            url: base.join("a.zip").unwrap(),
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;

        assert!(!state.is_permitted(&ctx.whitelist));
        assert!(state.is_permitted(&ServerWhitelist::default().with_mirror_base(base)));

        let destination = dir.path().join("a.zip");
        state
            .fetch(&ctx, &destination, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"mirrored");
    }
}
