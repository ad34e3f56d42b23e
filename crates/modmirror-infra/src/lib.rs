//! modmirror infrastructure library
//!
//! Shared infrastructure used by the worker and the CLI:
//! - Telemetry initialization (tracing-subscriber, text or JSON output)
//! - Per-job-kind rate limiting

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "rate-limit")]
pub mod rate_limit;

// Re-export commonly used types
#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, LogFormat};

#[cfg(feature = "rate-limit")]
pub use rate_limit::RateLimiter;
