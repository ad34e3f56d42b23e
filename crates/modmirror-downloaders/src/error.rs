//! Download error taxonomy
//!
//! A descriptor that does not belong to a protocol is not an error; recognition
//! returns `None` for it. Everything below is a real failure of an acquisition
//! attempt and is surfaced to the caller driving that archive. Nothing in this
//! crate retries on its own.

use modmirror_core::{AppError, ErrorMetadata, LogLevel};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Login required for {service}")]
    AuthRequired { service: String },

    #[error("Stored login for {service} was rejected")]
    AuthExpired { service: String },

    #[error("Login for {service} was canceled")]
    LoginCanceled { service: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Unexpected response from {endpoint}: {context}")]
    Protocol { endpoint: String, context: String },

    #[error("Source is not permitted by the server whitelist: {0}")]
    NotPermitted(String),

    #[error("Download canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential vault error: {0}")]
    Vault(#[from] AppError),
}

impl DownloadError {
    pub(crate) fn protocol(endpoint: impl Into<String>, context: impl Into<String>) -> Self {
        DownloadError::Protocol {
            endpoint: endpoint.into(),
            context: context.into(),
        }
    }

    /// True for the two errors a fresh login can fix.
    pub fn needs_login(&self) -> bool {
        matches!(
            self,
            DownloadError::AuthRequired { .. } | DownloadError::AuthExpired { .. }
        )
    }
}

impl ErrorMetadata for DownloadError {
    fn error_code(&self) -> &'static str {
        match self {
            DownloadError::AuthRequired { .. } => "AUTH_REQUIRED",
            DownloadError::AuthExpired { .. } => "AUTH_EXPIRED",
            DownloadError::LoginCanceled { .. } => "LOGIN_CANCELED",
            DownloadError::Network(_) => "NETWORK_ERROR",
            DownloadError::Integrity { .. } => "INTEGRITY_ERROR",
            DownloadError::Protocol { .. } => "PROTOCOL_ERROR",
            DownloadError::NotPermitted(_) => "NOT_PERMITTED",
            DownloadError::Canceled => "CANCELED",
            DownloadError::Io(_) => "IO_ERROR",
            DownloadError::Vault(_) => "VAULT_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DownloadError::AuthRequired { .. }
                | DownloadError::AuthExpired { .. }
                | DownloadError::Network(_)
        )
    }

    fn suggested_action(&self) -> Option<&'static str> {
        match self {
            DownloadError::AuthRequired { .. } | DownloadError::AuthExpired { .. } => {
                Some("Log in to the service again")
            }
            DownloadError::LoginCanceled { .. } => {
                Some("The login was declined; re-authenticate to download this archive")
            }
            DownloadError::Network(_) => Some("Retry after a short delay"),
            DownloadError::Integrity { .. } => {
                Some("Re-download the archive; report the source as corrupt if it keeps failing")
            }
            DownloadError::Protocol { .. } => {
                Some("The host changed its API; report this with the logged response context")
            }
            DownloadError::NotPermitted(_) => Some("Add the host to DOWNLOAD_WHITELIST"),
            DownloadError::Canceled => None,
            DownloadError::Io(_) => Some("Check free disk space and permissions"),
            DownloadError::Vault(_) => Some("Check VAULT_KEY or log out and log in again"),
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            DownloadError::LoginCanceled { .. } | DownloadError::Canceled => LogLevel::Debug,
            DownloadError::AuthRequired { .. }
            | DownloadError::AuthExpired { .. }
            | DownloadError::Network(_)
            | DownloadError::NotPermitted(_) => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_and_integrity_have_distinct_actions() {
        let canceled = DownloadError::LoginCanceled {
            service: "bethesda_net".into(),
        };
        let integrity = DownloadError::Integrity {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_ne!(canceled.suggested_action(), integrity.suggested_action());
        assert_ne!(canceled.error_code(), integrity.error_code());
        assert!(!canceled.is_recoverable());
        assert!(!integrity.is_recoverable());
    }

    #[test]
    fn auth_errors_need_login() {
        assert!(DownloadError::AuthExpired {
            service: "s".into()
        }
        .needs_login());
        assert!(!DownloadError::Canceled.needs_login());
    }
}
