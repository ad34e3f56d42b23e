//! modmirror worker
//!
//! Durable job queue backed by a [`JobStore`](modmirror_db::JobStore): a
//! bounded worker pool claims the highest-priority pending job, dispatches it
//! through a [`JobHandlerContext`], and records the outcome on the job.

pub mod context;
pub mod handlers;
pub mod queue;

pub use context::{empty_context_weak, JobHandlerContext};
pub use handlers::{PipelineContext, PipelineServices};
pub use queue::{JobFinishedSender, JobQueue};
