//! modmirror persistence layer
//!
//! Three stores back the pipeline: the durable job queue, upload records
//! waiting to be mirrored, and the archive catalog. Each has an in-memory
//! implementation (tests, single-node runs) and a Postgres implementation.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::StoreError;
pub use memory::{MemoryArchiveCatalog, MemoryJobStore, MemoryUploadStore};
pub use postgres::{
    connect, run_migrations, PgArchiveCatalog, PgJobStore, PgUploadStore, JOB_NOTIFY_CHANNEL,
};
pub use traits::{ArchiveCatalog, JobStore, UploadStore};

/// Reason recorded on jobs failed by the stale reaper.
pub const STALE_REASON: &str = "stale";

/// Result JSON recorded on a job the stale reaper failed.
pub fn stale_result(grace: chrono::Duration) -> serde_json::Value {
    serde_json::json!({
        "error": "Job stayed running past the stale grace period",
        "reason": STALE_REASON,
        "grace_seconds": grace.num_seconds(),
        "recoverable": true,
    })
}
