use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::descriptor::Descriptor;

/// Descriptor key holding a user-declared source URL.
pub const DIRECT_URL_KEY: &str = "directURL";
/// Descriptor key holding `Name: value` headers separated by `|`.
pub const DIRECT_URL_HEADERS_KEY: &str = "directURLHeaders";
/// Descriptor key written by the pipeline for republished content.
pub const MIRRORED_NAME_KEY: &str = "mirroredName";
/// Descriptor key written by the pipeline for republished content.
pub const MIRROR_URL_KEY: &str = "mirrorURL";

/// Host serving depot content pages.
pub const DEPOT_SITE_HOST: &str = "bethesda.net";

/// Everything needed to re-resolve one archive's source.
///
/// This is a closed set: adding a protocol means adding a variant, and every
/// `match` over states has to handle it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadState {
    Http(HttpState),
    Mirror(MirrorState),
    Depot(DepotState),
}

/// Direct URL download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpState {
    pub url: Url,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Copy of an archive that this system republished to its own mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorState {
    pub remote_name: String,
    pub url: Url,
}

/// Content served through the authenticated, chunked depot protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotState {
    pub game_name: String,
    pub content_id: String,
}

impl HttpState {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: BTreeMap::new(),
        }
    }
}

impl DepotState {
    /// Public content page for this depot item.
    pub fn content_page(&self) -> String {
        format!(
            "https://{}/en/mods/{}/mod-detail/{}",
            DEPOT_SITE_HOST, self.game_name, self.content_id
        )
    }
}

impl DownloadState {
    /// Protocol name used in logs and job results.
    pub fn protocol(&self) -> &'static str {
        match self {
            DownloadState::Http(_) => "http",
            DownloadState::Mirror(_) => "mirror",
            DownloadState::Depot(_) => "depot",
        }
    }

    /// Render this state back into the descriptor format it was recognized from.
    pub fn to_descriptor(&self) -> Descriptor {
        match self {
            DownloadState::Http(state) => {
                let mut d = Descriptor::new().with(DIRECT_URL_KEY, state.url.as_str());
                if !state.headers.is_empty() {
                    let headers = state
                        .headers
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, v))
                        .collect::<Vec<_>>()
                        .join("|");
                    d.insert(DIRECT_URL_HEADERS_KEY, headers);
                }
                d
            }
            DownloadState::Mirror(state) => Descriptor::new()
                .with(MIRRORED_NAME_KEY, state.remote_name.clone())
                .with(MIRROR_URL_KEY, state.url.as_str()),
            DownloadState::Depot(state) => {
                Descriptor::new().with(DIRECT_URL_KEY, state.content_page())
            }
        }
    }
}

/// Parse a `directURLHeaders` value. Entries without a colon are skipped.
pub fn parse_header_list(value: &str) -> BTreeMap<String, String> {
    value
        .split('|')
        .filter_map(|entry| entry.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
