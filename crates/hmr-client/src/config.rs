use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::FallbackPolicy;
use crate::checker::CheckerOptions;
use crate::error::{HmrError, HmrResult};

/// Client runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the dev server (assets and push endpoint)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Path of the push endpoint on the server
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// What to do with updates no module accepts
    #[serde(default)]
    pub policy: FallbackPolicy,

    /// Time a fetched chunk has to register its modules (ms)
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    /// Timeout for manifest and chunk requests (ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Manifest `h` links followed in one update attempt
    #[serde(default = "default_max_manifest_chain")]
    pub max_manifest_chain: usize,

    /// Delay before reconnecting a dropped push channel (ms)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:41900".to_string()
}

fn default_socket_path() -> String {
    "/__hmr".to_string()
}

fn default_chunk_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_manifest_chain() -> usize {
    16
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            socket_path: default_socket_path(),
            policy: FallbackPolicy::default(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_manifest_chain: default_max_manifest_chain(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> HmrResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HmrError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| HmrError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// WebSocket URL of the push endpoint, derived from `server_url`.
    pub fn socket_url(&self) -> HmrResult<String> {
        let base = self.server_url.trim_end_matches('/');
        let rest = if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            return Err(HmrError::Config(format!(
                "server_url must start with http:// or https://, got {}",
                self.server_url
            )));
        };
        Ok(format!("{}{}", rest, self.socket_path))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn checker_options(&self) -> CheckerOptions {
        CheckerOptions {
            chunk_timeout: Duration::from_millis(self.chunk_timeout_ms),
            max_manifest_chain: self.max_manifest_chain,
        }
    }
}
