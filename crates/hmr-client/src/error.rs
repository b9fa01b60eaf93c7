//! Client runtime error types.

use hmr_protocol::{BuildHash, ChunkId, ProtocolError};
use thiserror::Error;

/// Result type for client runtime operations.
pub type HmrResult<T> = Result<T, HmrError>;

/// Errors that abort an update attempt or a connection.
///
/// None of these mutate the applied hash, so every one of them is retried by
/// the next `ready` event. Uncontained updates are not errors; they are
/// reported through [`crate::ApplyReport`].
#[derive(Debug, Error)]
pub enum HmrError {
    /// Network failure while fetching a hot-update asset.
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Manifest body was not valid JSON or lacked the `c` key.
    #[error("Malformed update manifest from {url}: {message}")]
    MalformedManifest { url: String, message: String },

    /// A chunk body could not be executed.
    #[error("Malformed update chunk {chunk}: {message}")]
    MalformedChunk { chunk: ChunkId, message: String },

    /// A chunk registered modules nobody was waiting for.
    #[error("Chunk {chunk}@{from} registered modules but was not requested")]
    UnexpectedChunk { chunk: ChunkId, from: BuildHash },

    /// A fetched chunk never registered its modules.
    #[error("Chunk {chunk} did not register its modules within {timeout_ms} ms")]
    ChunkTimeout { chunk: ChunkId, timeout_ms: u64 },

    /// The registration slot was dropped before the chunk registered.
    #[error("Registration for chunk {0} was abandoned")]
    ChunkAbandoned(ChunkId),

    /// Following manifest `h` links never reached the target hash.
    #[error("Manifest chain from {from} did not reach {target} within {limit} steps")]
    ManifestChain {
        from: BuildHash,
        target: BuildHash,
        limit: usize,
    },

    /// Push channel failure.
    #[error("WebSocket error: {0}")]
    Socket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HmrError {
    /// Transport-class failures: network, status and malformed manifests are
    /// handled identically.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Status { .. } | Self::MalformedManifest { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HmrError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(Box::new(err))
    }
}
