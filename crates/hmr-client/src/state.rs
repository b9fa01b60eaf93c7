//! Build hashes tracked by a client.

use hmr_protocol::BuildHash;
use tokio::sync::RwLock;

/// Point-in-time copy of [`ConnectionState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashSnapshot {
    /// Latest hash announced by the server.
    pub latest_known: Option<BuildHash>,
    /// Hash the loaded modules correspond to.
    pub last_applied: Option<BuildHash>,
}

impl HashSnapshot {
    /// True when there is an announced hash the modules do not reflect yet.
    pub fn is_stale(&self) -> bool {
        match (&self.latest_known, &self.last_applied) {
            (Some(known), Some(applied)) => known != applied,
            _ => false,
        }
    }
}

/// Hash pair shared by the channel and the checker.
///
/// `latest_known` is written by every `hash` event. `last_applied` only moves
/// when the first hash becomes the baseline or an update fully succeeds.
#[derive(Debug, Default)]
pub struct ConnectionState {
    inner: RwLock<HashSnapshot>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known baseline, e.g. the hash the page was built with.
    pub fn with_baseline(hash: BuildHash) -> Self {
        Self {
            inner: RwLock::new(HashSnapshot {
                latest_known: Some(hash.clone()),
                last_applied: Some(hash),
            }),
        }
    }

    pub async fn record_hash(&self, hash: BuildHash) {
        self.inner.write().await.latest_known = Some(hash);
    }

    pub async fn snapshot(&self) -> HashSnapshot {
        self.inner.read().await.clone()
    }

    /// Adopt `latest_known` as the applied hash if nothing was applied yet.
    /// Returns the adopted hash.
    pub async fn adopt_baseline(&self) -> Option<BuildHash> {
        let mut state = self.inner.write().await;
        if state.last_applied.is_none() {
            state.last_applied = state.latest_known.clone();
            return state.last_applied.clone();
        }
        None
    }

    /// Record that the modules now reflect `hash`.
    pub async fn commit(&self, hash: BuildHash) {
        self.inner.write().await.last_applied = Some(hash);
    }
}
