//! modmirror downloaders
//!
//! Everything needed to turn a source descriptor into verified bytes on disk:
//!
//! - [`state`]: per-protocol behaviour of [`DownloadState`](modmirror_core::models::DownloadState)
//!   (direct HTTP, mirrored copies and the authenticated depot protocol)
//! - [`vault`]: encrypted-at-rest login artifacts, one file per service
//! - [`broker`]: the request/resume/cancel handshake used when a login is missing
//! - [`helper`]: an external login helper process that answers the broker
//! - [`resolver`]: recognition, policy checks, fetch and integrity verification

pub mod broker;
pub mod context;
pub mod error;
pub mod hashing;
pub mod helper;
pub mod resolver;
pub mod state;
#[cfg(test)]
pub(crate) mod test_support;
pub mod vault;
pub mod whitelist;

pub use broker::{LoginBroker, LoginHandle, LoginOutcome, LoginRequest};
pub use context::DownloadContext;
pub use error::DownloadError;
pub use hashing::{hash_file, ContentDigest};
pub use helper::ProcessLoginHelper;
pub use resolver::Resolver;
pub use state::depot::{DepotEndpoints, DEPOT_SERVICE};
pub use state::{recognize, Acquire, Recognize};
pub use vault::CredentialVault;
pub use whitelist::ServerWhitelist;
