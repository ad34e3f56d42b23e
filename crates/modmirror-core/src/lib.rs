//! modmirror core library
//!
//! Domain models, error types, configuration, encryption and progress
//! throttling shared by every modmirror component.

pub mod config;
pub mod descriptor;
pub mod encryption;
pub mod error;
pub mod job_error;
pub mod models;
pub mod progress;
pub mod storage_types;

// Re-export commonly used types
pub use config::Config;
pub use descriptor::Descriptor;
pub use encryption::EncryptionService;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use job_error::JobError;
pub use progress::{ProgressSink, ProgressThrottle, ThrottledProgress, TracingProgress, TransferProgress};
pub use storage_types::MirrorBackend;
