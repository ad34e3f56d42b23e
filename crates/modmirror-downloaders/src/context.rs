use modmirror_core::{Config, ProgressSink, TracingProgress};
use std::sync::Arc;

use crate::broker::LoginBroker;
use crate::error::DownloadError;
use crate::state::depot::DepotEndpoints;
use crate::vault::CredentialVault;
use crate::whitelist::ServerWhitelist;

const USER_AGENT: &str = concat!("modmirror/", env!("CARGO_PKG_VERSION"));

/// Services shared by every download attempt.
///
/// States never hold credentials; they reach the vault and the broker through
/// this context each time they need a login.
#[derive(Clone)]
pub struct DownloadContext {
    pub http: reqwest::Client,
    pub broker: LoginBroker,
    pub depot: DepotEndpoints,
    pub whitelist: ServerWhitelist,
    pub progress: Arc<dyn ProgressSink>,
}

impl DownloadContext {
    pub fn new(http: reqwest::Client, broker: LoginBroker) -> Self {
        Self {
            http,
            broker,
            depot: DepotEndpoints::default(),
            whitelist: ServerWhitelist::default(),
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn from_config(config: &Config, broker: LoginBroker) -> Result<Self, DownloadError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.http_timeout())
            .build()?;

        Ok(Self::new(http, broker)
            .with_depot_endpoints(DepotEndpoints::from_config(config))
            .with_whitelist(ServerWhitelist::from_config(config)))
    }

    pub fn with_depot_endpoints(mut self, depot: DepotEndpoints) -> Self {
        self.depot = depot;
        self
    }

    pub fn with_whitelist(mut self, whitelist: ServerWhitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        self.broker.vault()
    }
}
