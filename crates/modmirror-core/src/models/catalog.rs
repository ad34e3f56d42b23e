use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Archive, DownloadState};

/// Public identity of an archive that downstream consumers can resolve.
/// Unique on `(name, hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub hash: String,
    pub size: u64,
    pub state: DownloadState,
    pub registered_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn from_archive(archive: &Archive) -> Self {
        Self {
            name: archive.name.clone(),
            hash: archive.hash.clone(),
            size: archive.size,
            state: archive.state.clone(),
            registered_at: Utc::now(),
        }
    }
}
