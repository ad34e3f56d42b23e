use serde::{Deserialize, Serialize};

use super::DownloadState;

/// A named, sized, hash-identified piece of content and the state that knows
/// how to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub name: String,
    pub size: u64,
    /// Content hash exactly as the source reported it.
    pub hash: String,
    pub state: DownloadState,
}

impl Archive {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        hash: impl Into<String>,
        state: DownloadState,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            hash: hash.into(),
            state,
        }
    }
}
