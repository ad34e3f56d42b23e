use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file that was uploaded to this server and waits to be pushed to the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    /// Canonical name, used both on local disk and on the mirror.
    pub local_name: String,
    pub size: u64,
    pub hash: String,
    /// Where the file originally came from.
    pub source_uri: String,
}

impl UploadRecord {
    pub fn new(
        local_name: impl Into<String>,
        size: u64,
        hash: impl Into<String>,
        source_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            local_name: local_name.into(),
            size,
            hash: hash.into(),
            source_uri: source_uri.into(),
        }
    }
}
