//! Push events (server -> client).
//!
//! For every finished build the server sends `hash` followed by `ready`. A
//! client that connects mid-session receives the latest hash (if any build
//! has finished yet) and then `ready`.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::ids::BuildHash;

/// Events sent from the dev server to connected clients, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A build finished with this hash. A total snapshot, not a delta.
    Hash { hash: BuildHash },

    /// The preceding state is complete; the client may attempt an update.
    Ready,
}

impl ServerEvent {
    pub fn hash(hash: BuildHash) -> Self {
        Self::Hash { hash }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::decode("server event", e))
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::decode("server event", e))
    }
}
