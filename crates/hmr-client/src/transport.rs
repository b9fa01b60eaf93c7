//! Fetching hot-update assets.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hmr_protocol::{BuildHash, ChunkId, UpdateManifest, chunk_path, manifest_path};
use reqwest::Client;
use tracing::debug;

use crate::error::{HmrError, HmrResult};

/// Source of update manifests and chunk bodies.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    /// Manifest of the changes since `from`.
    async fn fetch_manifest(&self, from: &BuildHash) -> HmrResult<UpdateManifest>;

    /// Body of update chunk `chunk` relative to `from`.
    async fn fetch_chunk(&self, chunk: &ChunkId, from: &BuildHash) -> HmrResult<Bytes>;
}

/// HTTP transport against the dev server's static file root.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. "http://localhost:41900").
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> HmrResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HmrError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> HmrResult<(String, Bytes)> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HmrError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HmrError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| HmrError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok((url, body))
    }
}

#[async_trait]
impl UpdateTransport for HttpTransport {
    async fn fetch_manifest(&self, from: &BuildHash) -> HmrResult<UpdateManifest> {
        let (url, body) = self.get(&manifest_path(from)).await?;
        UpdateManifest::from_slice(&body).map_err(|e| HmrError::MalformedManifest {
            url,
            message: e.to_string(),
        })
    }

    async fn fetch_chunk(&self, chunk: &ChunkId, from: &BuildHash) -> HmrResult<Bytes> {
        let (_, body) = self.get(&chunk_path(chunk, from)).await?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let transport = HttpTransport::new("http://localhost:41900/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:41900");
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        // Port 9 (discard) is not expected to accept HTTP connections.
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = transport
            .fetch_manifest(&BuildHash::new("abc123").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
