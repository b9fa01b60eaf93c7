//! Update manifest served at `/{from}.hot-update.json`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::ids::{BuildHash, ChunkId, ModuleId};

/// What changed in one chunk.
///
/// Current bundlers list the changed module ids; older ones only flag the
/// chunk with `true`/`false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkChange {
    Modules(Vec<ModuleId>),
    Flag(bool),
}

impl ChunkChange {
    pub fn is_changed(&self) -> bool {
        match self {
            Self::Modules(_) => true,
            Self::Flag(changed) => *changed,
        }
    }
}

/// The delta between the hash a client has applied and a newer build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    /// Changed chunks. Mandatory; a manifest without `c` is malformed.
    #[serde(rename = "c")]
    pub changed_chunks: BTreeMap<ChunkId, ChunkChange>,

    /// The build this manifest leads to, when the server records it.
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    pub next_hash: Option<BuildHash>,
}

impl UpdateManifest {
    pub fn from_slice(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(|e| ProtocolError::decode("update manifest", e))
    }

    /// Chunk ids that must be fetched, in id order.
    pub fn chunk_ids(&self) -> impl Iterator<Item = &ChunkId> {
        self.changed_chunks
            .iter()
            .filter(|(_, change)| change.is_changed())
            .map(|(id, _)| id)
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_with_module_lists() {
        let manifest =
            UpdateManifest::from_slice(br#"{"c":{"main":["./src/title.js"],"vendor":[]}}"#).unwrap();
        let ids: Vec<_> = manifest.chunk_ids().map(ChunkId::as_str).collect();
        assert_eq!(ids, vec!["main", "vendor"]);
        assert!(manifest.next_hash.is_none());
    }

    #[test]
    fn test_manifest_with_legacy_flags() {
        let manifest =
            UpdateManifest::from_slice(br#"{"h":"def456","c":{"main":true,"other":false}}"#)
                .unwrap();
        let ids: Vec<_> = manifest.chunk_ids().map(ChunkId::as_str).collect();
        assert_eq!(ids, vec!["main"]);
        assert_eq!(manifest.next_hash.unwrap().as_str(), "def456");
    }

    #[test]
    fn test_manifest_without_chunks_is_malformed() {
        let err = UpdateManifest::from_slice(br#"{"h":"def456"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode { .. }));
        assert!(UpdateManifest::from_slice(b"not json").is_err());
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = UpdateManifest::from_slice(br#"{"c":{}}"#).unwrap();
        assert!(manifest.is_empty());
    }
}
