//! Error types module
//!
//! `AppError` covers configuration, encryption and other failures that are not
//! specific to one protocol or store. Component crates define their own error
//! enums and describe themselves through [`ErrorMetadata`], so a caller can
//! tell a user what to do next without matching on every variant.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected outcomes like a declined login
    Debug,
    /// Warning level - for recoverable issues like transient network failures
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be reported and handled.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "INTEGRITY_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether the operation may succeed if the caller retries it
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the user
    fn suggested_action(&self) -> Option<&'static str>;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Encryption(_) => "ENCRYPTION_ERROR",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "INTERNAL_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Internal(_) | AppError::InternalWithSource { .. }
        )
    }

    fn suggested_action(&self) -> Option<&'static str> {
        match self {
            AppError::Config(_) => Some("Check the environment configuration"),
            AppError::InvalidInput(_) => Some("Check the input and try again"),
            AppError::NotFound(_) => Some("Verify the identifier exists"),
            AppError::Encryption(_) => Some("Check VAULT_KEY or clear the stored login"),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                Some("Retry after a short delay")
            }
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            AppError::InvalidInput(_) | AppError::NotFound(_) => LogLevel::Debug,
            AppError::Config(_) => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}
