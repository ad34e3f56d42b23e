//! Data models
//!
//! Organized by domain: archives and their download states, durable jobs,
//! upload records, catalog entries and login artifacts.

mod archive;
mod catalog;
mod download_state;
mod job;
mod login;
mod upload;

pub use archive::*;
pub use catalog::*;
pub use download_state::*;
pub use job::*;
pub use login::*;
pub use upload::*;
