//! Data chunk format.
//!
//! A hot-update chunk addressed as `/{chunk}.{from}.hot-update.js` is executed
//! by the client runtime, which registers the chunk's module factories. For
//! data modules (configuration, copy, styles compiled to values) the body is a
//! JSON document describing each module declaratively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::ids::{ChunkId, ModuleId};

/// One module of a data chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleSource {
    /// Export bag installed when the module is evaluated.
    #[serde(default)]
    pub exports: Map<String, Value>,

    /// Modules this module depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<ModuleId>,

    /// Dependencies whose updates this module contains.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepts: Vec<ModuleId>,
}

/// Body of a data hot-update chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkUpdate {
    pub id: ChunkId,
    pub modules: BTreeMap<ModuleId, ModuleSource>,
}

impl ChunkUpdate {
    pub fn from_slice(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(|e| ProtocolError::decode("update chunk", e))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::decode("update chunk", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_chunk() {
        let body = br#"{
            "id": "main",
            "modules": {
                "./src/title.js": { "exports": { "title": "hello" } },
                "./src/index.js": {
                    "requires": ["./src/title.js"],
                    "accepts": ["./src/title.js"]
                }
            }
        }"#;

        let chunk = ChunkUpdate::from_slice(body).unwrap();
        assert_eq!(chunk.id.as_str(), "main");
        assert_eq!(chunk.modules.len(), 2);

        let title = &chunk.modules[&ModuleId::from("./src/title.js")];
        assert_eq!(title.exports["title"], "hello");
        assert!(title.requires.is_empty());

        let index = &chunk.modules[&ModuleId::from("./src/index.js")];
        assert_eq!(index.accepts, vec![ModuleId::from("./src/title.js")]);
    }

    #[test]
    fn test_chunk_with_invalid_id_is_rejected() {
        assert!(ChunkUpdate::from_slice(br#"{"id":"../main","modules":{}}"#).is_err());
    }
}
