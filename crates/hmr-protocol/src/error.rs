use thiserror::Error;

/// Errors raised while validating or decoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid build hash: {0:?}")]
    InvalidHash(String),

    #[error("Invalid chunk id: {0:?}")]
    InvalidChunkId(String),

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    pub(crate) fn decode(what: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { what, source }
    }
}
