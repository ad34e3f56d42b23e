//! Job handler context trait
//!
//! The pipeline implements this trait for its shared services. The worker calls
//! `dispatch_job` for every claimed job; the implementation matches on the
//! payload and invokes the matching handler.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

use modmirror_core::models::Job;

/// Context for job dispatch.
///
/// The worker holds a weak reference and stops claiming once it is gone.
/// Errors may wrap a [`JobError`](modmirror_core::JobError) to carry the
/// recoverable flag onto the job record.
#[async_trait]
pub trait JobHandlerContext: Send + Sync {
    /// Run the job and return the result JSON recorded on success.
    async fn dispatch_job(self: Arc<Self>, job: &Job) -> Result<serde_json::Value>;
}

struct NoopContext;

#[async_trait]
impl JobHandlerContext for NoopContext {
    async fn dispatch_job(self: Arc<Self>, _job: &Job) -> Result<serde_json::Value> {
        Err(anyhow!("NoopContext: no handler context available"))
    }
}

/// A weak reference that never upgrades. Workers built with it claim nothing
/// and only run the stale reaper.
pub fn empty_context_weak() -> Weak<dyn JobHandlerContext> {
    let n: Arc<dyn JobHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
