//! Depot API client
//!
//! Resolution runs five stages in order. Each stage takes the request context
//! of the previous one and derives its own; a failure anywhere ends the
//! attempt and nothing from it is reused.

use modmirror_core::models::LoginArtifact;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::chunk::ChunkKeys;
use super::endpoints::{DepotEndpoints, RequestContext};
use super::manifest::{
    AccessTokenResponse, CdpChunk, CdpTokenResponse, CdpTree, ContentInfo, ContentInfoResponse,
    DepotProperties, FirstProperty,
};
use super::DEPOT_SERVICE;
use crate::error::DownloadError;

/// Everything stages 1 to 4 produce.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub context: RequestContext,
    pub content: ContentInfo,
    pub tree: CdpTree,
}

/// What stage 5 adds for downloading chunk bytes.
#[derive(Debug, Clone)]
pub struct ChunkSource {
    pub context: RequestContext,
    pub product_id: i64,
    pub properties_id: i64,
    pub keys: ChunkKeys,
}

#[derive(Clone)]
pub struct DepotClient {
    http: reqwest::Client,
    endpoints: DepotEndpoints,
}

impl DepotClient {
    pub fn new(http: reqwest::Client, endpoints: DepotEndpoints) -> Self {
        Self { http, endpoints }
    }

    /// Stages 1 to 4: login exchange, token exchange, content lookup, manifest.
    pub async fn resolve_manifest(
        &self,
        artifact: &LoginArtifact,
        content_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedManifest, DownloadError> {
        let start = Instant::now();

        let login = RequestContext::for_login(artifact)?;
        let access_token = self.external_login(&login, artifact).await?;
        check_cancel(cancel)?;

        let identified = login.with_client_identity()?;
        let cdp_token = self.cdp_auth(&identified, &access_token).await?;
        check_cancel(cancel)?;

        let with_access = identified.with_access_token(&access_token)?;
        let content = self.content_info(&with_access, content_id).await?;
        check_cancel(cancel)?;

        let context = with_access.with_cdp_token(&cdp_token)?;
        let tree = self.tree(&context, &content).await?;

        tracing::debug!(
            content_id = %content_id,
            product_id = content.cdp_product_id,
            branch_id = content.cdp_branch_id,
            depots = tree.depot_list.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Depot manifest resolved"
        );

        Ok(ResolvedManifest {
            context,
            content,
            tree,
        })
    }

    /// Stage 5: per-branch properties holding the chunk key and IV.
    pub async fn chunk_source(
        &self,
        manifest: &ResolvedManifest,
        cancel: &CancellationToken,
    ) -> Result<ChunkSource, DownloadError> {
        check_cancel(cancel)?;
        let url = self.endpoints.depots(
            manifest.content.cdp_product_id,
            manifest.content.cdp_branch_id,
        )?;
        let FirstProperty(properties) = self
            .get_json::<FirstProperty<DepotProperties>>(&manifest.context, &url)
            .await?;
        let properties = properties
            .ok_or_else(|| DownloadError::protocol(url.as_str(), "depot properties object is empty"))?;

        let keys = ChunkKeys::new(&properties.key, &properties.iv, url.as_str())?;

        Ok(ChunkSource {
            context: manifest.context.clone(),
            product_id: manifest.content.cdp_product_id,
            properties_id: properties.properties_id,
            keys,
        })
    }

    /// Raw (still encrypted) bytes of one chunk.
    pub async fn fetch_chunk(&self, source: &ChunkSource, chunk: &CdpChunk) -> Result<Vec<u8>, DownloadError> {
        let url = self
            .endpoints
            .chunk(source.product_id, source.properties_id, &chunk.sha)?;
        let response = self
            .http
            .get(url)
            .headers(source.context.headers().clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn external_login(
        &self,
        context: &RequestContext,
        artifact: &LoginArtifact,
    ) -> Result<String, DownloadError> {
        let url = self.endpoints.external_login()?;
        let request = self
            .http
            .post(url.clone())
            .headers(context.headers().clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(artifact.body.clone());

        let response = request.send().await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            tracing::warn!(status = %response.status(), "Depot login exchange rejected stored login");
            return Err(DownloadError::AuthExpired {
                service: DEPOT_SERVICE.to_string(),
            });
        }

        let body: AccessTokenResponse = read_json(&url, response).await?;
        Ok(body.access_token)
    }

    async fn cdp_auth(&self, context: &RequestContext, access_token: &str) -> Result<String, DownloadError> {
        let url = self.endpoints.cdp_auth()?;
        let request = self
            .http
            .post(url.clone())
            .headers(context.headers().clone())
            .json(&serde_json::json!({ "access_token": access_token }));
        let body: CdpTokenResponse = self.send_json(&url, request).await?;
        Ok(body.token)
    }

    async fn content_info(&self, context: &RequestContext, content_id: &str) -> Result<ContentInfo, DownloadError> {
        let url = self.endpoints.content_info(content_id)?;
        let body: ContentInfoResponse = self.get_json(context, &url).await?;
        Ok(body.platform.response.content)
    }

    async fn tree(&self, context: &RequestContext, content: &ContentInfo) -> Result<CdpTree, DownloadError> {
        let url = self
            .endpoints
            .tree(content.cdp_product_id, content.cdp_branch_id)?;
        self.get_json(context, &url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, context: &RequestContext, url: &Url) -> Result<T, DownloadError> {
        let request = self.http.get(url.clone()).headers(context.headers().clone());
        self.send_json(url, request).await
    }

    async fn send_json<T: DeserializeOwned>(&self, url: &Url, request: RequestBuilder) -> Result<T, DownloadError> {
        let response = request.send().await?;
        read_json(url, response).await
    }
}

async fn read_json<T: DeserializeOwned>(url: &Url, response: reqwest::Response) -> Result<T, DownloadError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(DownloadError::protocol(
            url.path(),
            format!("HTTP {}: {}", status, truncate(&text)),
        ));
    }
    serde_json::from_str(&text).map_err(|e| {
        DownloadError::protocol(url.path(), format!("{} in body {}", e, truncate(&text)))
    })
}

fn truncate(text: &str) -> &str {
    const MAX: usize = 256;
    match text.char_indices().nth(MAX) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), DownloadError> {
    if cancel.is_cancelled() {
        Err(DownloadError::Canceled)
    } else {
        Ok(())
    }
}
