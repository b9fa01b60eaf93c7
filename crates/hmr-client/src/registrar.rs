//! Chunk registration.
//!
//! Executing an update chunk pushes its module factories into the runtime
//! instead of returning them. The checker reserves a slot per requested chunk
//! with [`ChunkRegistrar::expect`], triggers execution, and awaits the
//! returned [`PendingChunk`]; the executing chunk completes it through
//! [`ChunkRegistrar::register`].
//!
//! Slots are keyed by chunk id and the hash the chunk was fetched against, so
//! a late registration from an abandoned load cannot complete a newer one.

use std::time::Duration;

use dashmap::DashMap;
use hmr_protocol::{BuildHash, ChunkId};
use tokio::sync::oneshot;
use tracing::debug;

use crate::applier::ModuleFactories;
use crate::error::{HmrError, HmrResult};

/// Table of chunks that were requested but have not registered yet.
#[derive(Default)]
pub struct ChunkRegistrar {
    pending: DashMap<(ChunkId, BuildHash), oneshot::Sender<ModuleFactories>>,
}

impl ChunkRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a registration slot for `chunk` fetched against `from`. A
    /// second reservation for the same pair abandons the first.
    pub fn expect(&self, chunk: &ChunkId, from: &BuildHash) -> PendingChunk {
        let (tx, rx) = oneshot::channel();
        self.pending.insert((chunk.clone(), from.clone()), tx);
        PendingChunk {
            chunk: chunk.clone(),
            rx,
        }
    }

    /// Called by an executing chunk with the factories it defines.
    pub fn register(
        &self,
        chunk: &ChunkId,
        from: &BuildHash,
        modules: ModuleFactories,
    ) -> HmrResult<()> {
        let unexpected = || HmrError::UnexpectedChunk {
            chunk: chunk.clone(),
            from: from.clone(),
        };
        let Some((_, tx)) = self.pending.remove(&(chunk.clone(), from.clone())) else {
            return Err(unexpected());
        };
        debug!("Chunk {}@{} registered {} modules", chunk, from, modules.len());
        tx.send(modules).map_err(|_| unexpected())
    }

    /// Release the slot of a chunk whose load failed.
    pub fn cancel(&self, chunk: &ChunkId, from: &BuildHash) {
        self.pending.remove(&(chunk.clone(), from.clone()));
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Completion of one chunk registration.
pub struct PendingChunk {
    chunk: ChunkId,
    rx: oneshot::Receiver<ModuleFactories>,
}

impl PendingChunk {
    pub fn chunk(&self) -> &ChunkId {
        &self.chunk
    }

    /// Wait for the chunk to register, at most `timeout`.
    pub async fn wait(self, timeout: Duration) -> HmrResult<ModuleFactories> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(modules)) => Ok(modules),
            Ok(Err(_)) => Err(HmrError::ChunkAbandoned(self.chunk)),
            Err(_) => Err(HmrError::ChunkTimeout {
                chunk: self.chunk,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
