//! Response shapes of the depot API

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Deserialize)]
pub(crate) struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CdpTokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentInfoResponse {
    pub platform: ContentPlatform,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentPlatform {
    pub response: ContentPlatformResponse,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentPlatformResponse {
    pub content: ContentInfo,
}

/// Where a content item lives in the content-delivery platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ContentInfo {
    pub cdp_branch_id: i64,
    pub cdp_product_id: i64,
}

/// Chunk manifest of one product branch.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpTree {
    #[serde(default)]
    pub depot_list: Vec<CdpDepot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CdpDepot {
    #[serde(default)]
    pub file_list: Vec<CdpFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CdpFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chunk_count: u64,
    #[serde(default)]
    pub chunk_list: Vec<CdpChunk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CdpChunk {
    pub index: u64,
    pub sha: String,
    /// Size of the chunk as served (after compression).
    pub chunk_size: u64,
    pub uncompressed_size: u64,
}

impl CdpTree {
    /// The file a content item resolves to: first depot, first file.
    pub fn primary_file(&self) -> Option<&CdpFile> {
        self.depot_list.first()?.file_list.first()
    }
}

impl CdpFile {
    /// Chunks in ascending `index` order. The manifest does not promise any.
    pub fn ordered_chunks(&self) -> Vec<CdpChunk> {
        let mut chunks = self.chunk_list.clone();
        chunks.sort_by_key(|chunk| chunk.index);
        chunks
    }

    /// Denominator for progress: the declared count, or the list length if
    /// the manifest omits it.
    pub fn progress_total(&self) -> u64 {
        if self.chunk_count > 0 {
            self.chunk_count
        } else {
            self.chunk_list.len() as u64
        }
    }

    pub fn is_compressed(chunk: &CdpChunk) -> bool {
        chunk.uncompressed_size != chunk.chunk_size
    }
}

/// Per-branch properties carrying the chunk key material.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DepotProperties {
    pub properties_id: i64,
    #[serde(rename = "ex_info_A")]
    pub key: Vec<u8>,
    #[serde(rename = "ex_info_B")]
    pub iv: Vec<u8>,
}

/// Value of the first member of a JSON object, in document order.
pub(crate) struct FirstProperty<T>(pub Option<T>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FirstProperty<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FirstVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for FirstVisitor<T> {
            type Value = FirstProperty<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let first = match map.next_key::<IgnoredAny>()? {
                    Some(_) => Some(map.next_value::<T>()?),
                    None => None,
                };
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(FirstProperty(first))
            }
        }

        deserializer.deserialize_map(FirstVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_property_follows_document_order() {
        let json = r#"{
            "zeta": {"properties_id": 1, "ex_info_A": [1, 2], "ex_info_B": [3]},
            "alpha": {"properties_id": 2, "ex_info_A": [], "ex_info_B": []}
        }"#;
        let FirstProperty(first) = serde_json::from_str::<FirstProperty<DepotProperties>>(json).unwrap();
        let first = first.unwrap();
        assert_eq!(first.properties_id, 1);
        assert_eq!(first.key, vec![1, 2]);
    }

    #[test]
    fn first_property_of_empty_object() {
        let FirstProperty(first) = serde_json::from_str::<FirstProperty<DepotProperties>>("{}").unwrap();
        assert!(first.is_none());
        assert!(serde_json::from_str::<FirstProperty<DepotProperties>>("[]").is_err());
    }

    #[test]
    fn key_bytes_must_be_small_integers() {
        let json = r#"{"p": {"properties_id": 1, "ex_info_A": [256], "ex_info_B": []}}"#;
        assert!(serde_json::from_str::<FirstProperty<DepotProperties>>(json).is_err());
    }

    #[test]
    fn chunks_sort_by_index() {
        let tree: CdpTree = serde_json::from_value(serde_json::json!({
            "depot_list": [{
                "file_list": [{
                    "name": "mod.zip",
                    "chunk_count": 3,
                    "chunk_list": [
                        {"index": 2, "sha": "c", "chunk_size": 5, "uncompressed_size": 10},
                        {"index": 0, "sha": "a", "chunk_size": 10, "uncompressed_size": 10},
                        {"index": 1, "sha": "b", "chunk_size": 10, "uncompressed_size": 10}
                    ]
                }]
            }]
        }))
        .unwrap();

        let file = tree.primary_file().unwrap();
        let order: Vec<_> = file.ordered_chunks().iter().map(|c| c.sha.clone()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(file.progress_total(), 3);
        assert!(CdpFile::is_compressed(&file.chunk_list[0]));
        assert!(!CdpFile::is_compressed(&file.chunk_list[1]));
    }

    #[test]
    fn empty_tree_has_no_primary_file() {
        let tree: CdpTree = serde_json::from_str(r#"{"depot_list": []}"#).unwrap();
        assert!(tree.primary_file().is_none());
    }
}
