//! Direct URL downloads

use async_trait::async_trait;
use futures::StreamExt;
use modmirror_core::models::{
    parse_header_list, HttpState, DIRECT_URL_HEADERS_KEY, DIRECT_URL_KEY, MIRRORED_NAME_KEY,
};
use modmirror_core::{Descriptor, ThrottledProgress};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{depot, Acquire, StagedFile};
use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::whitelist::ServerWhitelist;

/// `directURL` with an http(s) scheme, unless it is a depot content page or
/// the descriptor carries pipeline mirror keys.
pub fn recognize(descriptor: &Descriptor) -> Option<HttpState> {
    if descriptor.get(MIRRORED_NAME_KEY).is_some() || depot::recognize(descriptor).is_some() {
        return None;
    }

    let url = Url::parse(descriptor.get(DIRECT_URL_KEY)?).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }

    let mut state = HttpState::new(url);
    if let Some(headers) = descriptor.get(DIRECT_URL_HEADERS_KEY) {
        state.headers = parse_header_list(headers);
    }
    Some(state)
}

#[async_trait]
impl Acquire for HttpState {
    fn is_permitted(&self, whitelist: &ServerWhitelist) -> bool {
        // Indexed copies point at the mirror with a plain URL.
        whitelist.allows_url(&self.url) || whitelist.allows_mirror_url(&self.url)
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
        download_url(ctx, &self.url, &self.headers, destination, cancel).await
    }

    async fn verify(&self, ctx: &DownloadContext) -> Result<bool, DownloadError> {
        head_ok(ctx, &self.url, &self.headers).await
    }

    fn describe_for_report(&self) -> String {
        format!("Direct download: {}", self.url)
    }
}

pub(crate) fn header_map(
    headers: &BTreeMap<String, String>,
    url: &Url,
) -> Result<HeaderMap, DownloadError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            DownloadError::protocol(url.as_str(), format!("invalid header name {:?}: {}", name, e))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            DownloadError::protocol(url.as_str(), format!("invalid value for header {}: {}", name, e))
        })?;
        map.insert(header, value);
    }
    Ok(map)
}

/// Stream `url` into a staged file and move it over `destination` on success.
pub(crate) async fn download_url(
    ctx: &DownloadContext,
    url: &Url,
    headers: &BTreeMap<String, String>,
    destination: &Path,
    cancel: &CancellationToken,
) -> Result<(), DownloadError> {
    let start = Instant::now();
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string());
    let progress = ThrottledProgress::new(name, ctx.progress.clone());

    let request = ctx.http.get(url.clone()).headers(header_map(headers, url)?);
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Canceled),
        response = request.send() => response?.error_for_status()?,
    };
    let total = response.content_length();

    let mut staged = StagedFile::create(destination).await?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Canceled),
            next = body.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        staged.file().write_all(&chunk).await?;
        written += chunk.len() as u64;
        progress.bytes(written, total);
    }

    staged.commit().await?;

    tracing::info!(
        url = %url,
        destination = %destination.display(),
        size_bytes = written,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Download complete"
    );
    Ok(())
}

/// HEAD `url`; any 2xx counts as reachable.
pub(crate) async fn head_ok(
    ctx: &DownloadContext,
    url: &Url,
    headers: &BTreeMap<String, String>,
) -> Result<bool, DownloadError> {
    let response = ctx
        .http
        .head(url.clone())
        .headers(header_map(headers, url)?)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        tracing::debug!(url = %url, status = %status, "Source did not verify");
    }
    Ok(status.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;
    use modmirror_core::models::DownloadState;

    #[test]
    fn reads_headers_from_descriptor() {
        let descriptor = Descriptor::parse(
            "[General]\ndirectURL=https://host/mod.zip\ndirectURLHeaders=Cookie: a=b|Referer: https://host/",
        );
        let state = recognize(&descriptor).unwrap();
        assert_eq!(state.headers.get("Cookie").map(String::as_str), Some("a=b"));
        assert_eq!(state.headers.len(), 2);
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(recognize(&Descriptor::parse("directURL=file:///etc/passwd")).is_none());
        assert!(recognize(&Descriptor::parse("directURL=ftp://host/a.zip")).is_none());
    }

    #[tokio::test]
    async fn fetches_and_verifies_direct_url() {
        let mut server = mockito::Server::new_async().await;
        let body = b"archive bytes for scenario A".to_vec();
        let get = server
            .mock("GET", "/mod.zip")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;
        let head = server
            .mock("HEAD", "/mod.zip")
            .with_status(200)
            .create_async()
            .await;

        let descriptor = Descriptor::parse(&format!("[General]\ndirectURL={}/mod.zip", server.url()));
        let state = crate::state::recognize(&descriptor).unwrap();
        assert!(matches!(state, DownloadState::Http(_)));

        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let destination = dir.path().join("out").join("mod.zip");

        state
            .fetch(&ctx, &destination, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), body);
        assert!(state.verify(&ctx).await.unwrap());

        get.assert_async().await;
        head.assert_async().await;
    }

    #[tokio::test]
    async fn sends_declared_headers() {
        let mut server = mockito::Server::new_async().await;
        let get = server
            .mock("GET", "/mod.zip")
            .match_header("cookie", "session=1")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let mut state = HttpState::new(Url::parse(&format!("{}/mod.zip", server.url())).unwrap());
        state.headers.insert("Cookie".into(), "session=1".into());

        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        state
            .fetch(&ctx, &dir.path().join("mod.zip"), &CancellationToken::new())
            .await
            .unwrap();
        get.assert_async().await;
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_destination() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/gone.zip")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("HEAD", "/gone.zip")
            .with_status(404)
            .create_async()
            .await;

        let state = HttpState::new(Url::parse(&format!("{}/gone.zip", server.url())).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let destination = dir.path().join("gone.zip");

        let result = state.fetch(&ctx, &destination, &CancellationToken::new()).await;
        assert!(matches!(result, Err(DownloadError::Network(_))));
        assert!(!destination.exists());
        assert!(!state.verify(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn canceled_fetch_leaves_no_destination() {
        let state = HttpState::new(Url::parse("http://127.0.0.1:9/never.zip").unwrap());
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let destination = dir.path().join("never.zip");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = state.fetch(&ctx, &destination, &cancel).await;
        assert!(matches!(result, Err(DownloadError::Canceled)));
        assert!(!destination.exists());
    }

    #[test]
    fn whitelist_applies_to_direct_urls() {
        let state = HttpState::new(Url::parse("https://files.example.com/a.zip").unwrap());
        assert!(state.is_permitted(&ServerWhitelist::new(["https://files.example.com/"])));
        assert!(!state.is_permitted(&ServerWhitelist::default()));
    }

    #[test]
    fn mirrored_copies_are_permitted_without_a_whitelist() {
        let config = modmirror_core::Config::from_lookup(|key| {
            (key == "MIRROR_PUBLIC_BASE_URL").then(|| "https://mirror.example/files/".to_string())
        })
        .unwrap();
        assert!(config.download_whitelist.is_empty());
        let whitelist = ServerWhitelist::from_config(&config);

        let indexed = DownloadState::Http(HttpState::new(
            Url::parse("https://mirror.example/files/a.zip").unwrap(),
        ));
        assert!(indexed.is_permitted(&whitelist));

        let elsewhere = DownloadState::Http(HttpState::new(
            Url::parse("https://other.example/files/a.zip").unwrap(),
        ));
        assert!(!elsewhere.is_permitted(&whitelist));
    }
}
