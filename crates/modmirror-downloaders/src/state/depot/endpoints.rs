use modmirror_core::models::LoginArtifact;
use modmirror_core::Config;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use url::Url;

use crate::error::DownloadError;

const DEFAULT_API_BASE: &str = "https://api.bethesda.net";
const DEFAULT_CONTENT_BASE: &str = "https://content.cdp.bethesda.net";

/// User agent the account service expects.
const LOGIN_USER_AGENT: &str = "bnet";

/// Client identity sent from the content-delivery token exchange onwards.
pub const CLIENT_IDENTITY: [(&str, &str); 4] = [
    ("x-cdp-app", "UGC SDK"),
    ("x-cdp-app-ver", "0.9.11314/debug"),
    ("x-cdp-lib-ver", "0.9.11314/debug"),
    ("x-cdp-platform", "Win/32"),
];

const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Base URLs of the depot API and its chunk CDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotEndpoints {
    pub api_base: Url,
    pub content_base: Url,
}

impl Default for DepotEndpoints {
    fn default() -> Self {
        Self {
            api_base: Url::parse(DEFAULT_API_BASE).expect("default API base is a valid URL"),
            content_base: Url::parse(DEFAULT_CONTENT_BASE)
                .expect("default content base is a valid URL"),
        }
    }
}

impl DepotEndpoints {
    pub fn new(api_base: Url, content_base: Url) -> Self {
        Self {
            api_base,
            content_base,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.depot_api_base.clone(),
            config.depot_content_base.clone(),
        )
    }

    pub fn external_login(&self) -> Result<Url, DownloadError> {
        join(&self.api_base, "beam/accounts/external_login")
    }

    pub fn cdp_auth(&self) -> Result<Url, DownloadError> {
        join(&self.api_base, "cdp-user/auth")
    }

    pub fn content_info(&self, content_id: &str) -> Result<Url, DownloadError> {
        let mut url = join(&self.api_base, "mods/ugc-workshop/content/get")?;
        url.query_pairs_mut().append_pair("content_id", content_id);
        Ok(url)
    }

    pub fn tree(&self, product_id: i64, branch_id: i64) -> Result<Url, DownloadError> {
        join(
            &self.api_base,
            &format!("cdp-user/projects/{}/branches/{}/tree/.json", product_id, branch_id),
        )
    }

    pub fn depots(&self, product_id: i64, branch_id: i64) -> Result<Url, DownloadError> {
        join(
            &self.api_base,
            &format!("cdp-user/projects/{}/branches/{}/depots/.json", product_id, branch_id),
        )
    }

    pub fn chunk(&self, product_id: i64, properties_id: i64, sha: &str) -> Result<Url, DownloadError> {
        join(
            &self.content_base,
            &format!("{}/{}/{}", product_id, properties_id, sha),
        )
    }
}

fn join(base: &Url, path: &str) -> Result<Url, DownloadError> {
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| DownloadError::protocol(joined.clone(), e.to_string()))
}

/// Headers for one stage of one resolution attempt.
///
/// Contexts are never mutated; each stage derives the next one, so nothing
/// set for one attempt leaks into another.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    headers: HeaderMap,
}

impl RequestContext {
    /// Stage 1: the login helper's `x-` headers and the account user agent.
    pub fn for_login(artifact: &LoginArtifact) -> Result<Self, DownloadError> {
        let mut context = Self::default().with_header(USER_AGENT.as_str(), LOGIN_USER_AGENT)?;
        for (name, value) in artifact.extension_headers() {
            context = context.with_header(name, value)?;
        }
        Ok(context)
    }

    pub fn with_client_identity(&self) -> Result<Self, DownloadError> {
        CLIENT_IDENTITY
            .iter()
            .try_fold(self.clone(), |context, (name, value)| context.with_header(name, value))
    }

    pub fn with_access_token(&self, access_token: &str) -> Result<Self, DownloadError> {
        self.with_header(ACCESS_TOKEN_HEADER, access_token)
    }

    pub fn with_cdp_token(&self, cdp_token: &str) -> Result<Self, DownloadError> {
        self.with_header(AUTHORIZATION.as_str(), &format!("Token {}", cdp_token))
    }

    pub fn with_header(&self, name: &str, value: &str) -> Result<Self, DownloadError> {
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            DownloadError::protocol("request context", format!("invalid header name {:?}: {}", name, e))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            DownloadError::protocol("request context", format!("invalid value for header {}: {}", name, e))
        })?;

        let mut headers = self.headers.clone();
        headers.insert(header, value);
        Ok(Self { headers })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
