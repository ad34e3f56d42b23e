//! Authenticated, chunked depot downloads
//!
//! Content pages look like
//! `https://bethesda.net/en/mods/{game}/mod-detail/{content_id}`. Fetching one
//! resolves a manifest through the depot API, then pulls every chunk of the
//! first file, decrypts and (if needed) inflates it, and appends it to the
//! destination in index order.
//!
//! Chunks are prefetched a few at a time. Completed chunks wait in a reorder
//! buffer until every earlier chunk has been written, and the window counts
//! both in-flight and buffered chunks so memory stays bounded.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use modmirror_core::models::{DepotState, DEPOT_SITE_HOST, DIRECT_URL_KEY};
use modmirror_core::{Descriptor, ThrottledProgress};
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Acquire, StagedFile};
use crate::context::DownloadContext;
use crate::error::DownloadError;
use crate::whitelist::ServerWhitelist;

pub mod chunk;
pub mod client;
pub mod endpoints;
pub mod manifest;

pub use chunk::{ChunkAssembler, ChunkKeys};
pub use client::DepotClient;
pub use endpoints::{DepotEndpoints, RequestContext};

/// Vault and broker key for depot logins.
pub const DEPOT_SERVICE: &str = "bethesda_net";

/// Chunks fetched or buffered ahead of the write position.
const PREFETCH_CHUNKS: usize = 4;

const CONTENT_PATH_PREFIX: &str = "/en/mods/";

pub fn recognize(descriptor: &Descriptor) -> Option<DepotState> {
    let url = Url::parse(descriptor.get(DIRECT_URL_KEY)?).ok()?;
    if url.host_str() != Some(DEPOT_SITE_HOST) || !url.path().starts_with(CONTENT_PATH_PREFIX) {
        return None;
    }

    // en / mods / {game} / mod-detail / {content_id}
    let segments: Vec<&str> = url.path_segments()?.collect();
    let game_name = segments.get(2).filter(|s| !s.is_empty())?;
    let content_id = segments.get(4).filter(|s| !s.is_empty())?;

    Some(DepotState {
        game_name: game_name.to_string(),
        content_id: content_id.to_string(),
    })
}

#[async_trait]
impl Acquire for DepotState {
    fn is_permitted(&self, _whitelist: &ServerWhitelist) -> bool {
        true
    }

    async fn prepare(&self, ctx: &DownloadContext) -> Result<(), DownloadError> {
        ctx.broker.request_login(DEPOT_SERVICE).await.map(|_| ())
    }

    async fn fetch(
        &self,
        ctx: &DownloadContext,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let start = Instant::now();
        let artifact = ctx
            .vault()
            .get(DEPOT_SERVICE)
            .await?
            .ok_or_else(|| DownloadError::AuthRequired {
                service: DEPOT_SERVICE.to_string(),
            })?;

        let client = DepotClient::new(ctx.http.clone(), ctx.depot.clone());
        let manifest = client
            .resolve_manifest(&artifact, &self.content_id, cancel)
            .await?;
        let source = client.chunk_source(&manifest, cancel).await?;

        let file = manifest.tree.primary_file().ok_or_else(|| {
            DownloadError::protocol(
                "tree",
                format!("manifest for content {} lists no files", self.content_id),
            )
        })?;
        let chunks = file.ordered_chunks();
        let total = file.progress_total();
        let progress = ThrottledProgress::new(
            format!("Downloading {}", display_name(destination, &file.name)),
            ctx.progress.clone(),
        );

        let mut staged = StagedFile::create(destination).await?;
        let mut assembler = ChunkAssembler::new(staged.file(), chunks.len());
        let mut queued = chunks.iter().enumerate();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() + assembler.buffered() < PREFETCH_CHUNKS {
                let Some((position, chunk)) = queued.next() else {
                    break;
                };
                in_flight.push(fetch_decoded(&client, &source, position, chunk));
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Canceled),
                next = in_flight.next() => next,
            };
            let Some(result) = next else {
                break;
            };

            let (position, bytes) = result?;
            for written in assembler.accept(position, bytes).await? {
                progress.steps(chunks[written].index, total, assembler.bytes_written());
            }
        }

        if !assembler.is_complete() {
            return Err(DownloadError::protocol(
                "chunks",
                "chunk stream ended before every chunk was written",
            ));
        }
        let size = assembler.bytes_written();
        drop(assembler);
        staged.commit().await?;

        tracing::info!(
            game = %self.game_name,
            content_id = %self.content_id,
            chunks = chunks.len(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Depot download complete"
        );
        Ok(())
    }

    async fn verify(&self, ctx: &DownloadContext) -> Result<bool, DownloadError> {
        let artifact = ctx
            .vault()
            .get(DEPOT_SERVICE)
            .await?
            .ok_or_else(|| DownloadError::AuthRequired {
                service: DEPOT_SERVICE.to_string(),
            })?;

        let client = DepotClient::new(ctx.http.clone(), ctx.depot.clone());
        let manifest = client
            .resolve_manifest(&artifact, &self.content_id, &CancellationToken::new())
            .await?;
        Ok(manifest.tree.primary_file().is_some())
    }

    fn describe_for_report(&self) -> String {
        format!(
            "Bethesda.net: {} mod {} ({})",
            self.game_name,
            self.content_id,
            self.content_page()
        )
    }
}

async fn fetch_decoded(
    client: &DepotClient,
    source: &client::ChunkSource,
    position: usize,
    chunk: &manifest::CdpChunk,
) -> Result<(usize, Vec<u8>), DownloadError> {
    let raw = client.fetch_chunk(source, chunk).await?;
    let decoded = chunk::decode_chunk(chunk, &source.keys, raw)?;
    Ok((position, decoded))
}

fn display_name(destination: &Path, manifest_name: &str) -> String {
    destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| manifest_name.to_string())
}
