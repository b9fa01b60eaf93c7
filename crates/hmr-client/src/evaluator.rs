//! Executing fetched update chunks.

use hmr_protocol::{BuildHash, ChunkId, ChunkUpdate, ModuleSource};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::applier::ModuleFactories;
use crate::error::{HmrError, HmrResult};
use crate::registrar::ChunkRegistrar;
use crate::registry::{AcceptedUpdate, ModuleFactory, module_factory};

/// Turns a chunk body into registered module factories.
///
/// Implementations must finish by calling [`ChunkRegistrar::register`] for
/// `chunk` and `from`, either synchronously or from a task they spawn.
pub trait ChunkEvaluator: Send + Sync {
    fn evaluate(
        &self,
        chunk: &ChunkId,
        from: &BuildHash,
        body: &[u8],
        registrar: &ChunkRegistrar,
    ) -> HmrResult<()>;
}

/// Evaluator for JSON data chunks ([`ChunkUpdate`]).
///
/// Each module's factory installs its declared exports, records its
/// `requires` as children and accepts the modules listed in `accepts`.
/// Accept callbacks forward the [`AcceptedUpdate`] to `accepted` when set.
#[derive(Debug, Clone, Default)]
pub struct DataChunkEvaluator {
    accepted: Option<mpsc::UnboundedSender<AcceptedUpdate>>,
}

impl DataChunkEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every accept callback invocation to `tx`.
    pub fn with_accept_channel(tx: mpsc::UnboundedSender<AcceptedUpdate>) -> Self {
        Self { accepted: Some(tx) }
    }

    fn factory(&self, source: ModuleSource) -> ModuleFactory {
        let accepted = self.accepted.clone();
        module_factory(move |scope| {
            for (name, value) in &source.exports {
                scope.export(name.clone(), value.clone());
            }
            for dependency in &source.requires {
                scope.require(dependency.clone());
            }
            if !source.accepts.is_empty() {
                let tx = accepted.clone();
                scope.hot().accept(source.accepts.iter().cloned(), move |update| {
                    info!(
                        "{} accepted the update of {} (changed: {})",
                        update.acceptor, update.dependency, update.changed
                    );
                    if let Some(tx) = &tx {
                        let _ = tx.send(update.clone());
                    }
                });
            }
            Ok(())
        })
    }
}

impl ChunkEvaluator for DataChunkEvaluator {
    fn evaluate(
        &self,
        chunk: &ChunkId,
        from: &BuildHash,
        body: &[u8],
        registrar: &ChunkRegistrar,
    ) -> HmrResult<()> {
        let update = ChunkUpdate::from_slice(body).map_err(|e| HmrError::MalformedChunk {
            chunk: chunk.clone(),
            message: e.to_string(),
        })?;

        if &update.id != chunk {
            return Err(HmrError::MalformedChunk {
                chunk: chunk.clone(),
                message: format!("body declares chunk {}", update.id),
            });
        }

        debug!("Evaluating chunk {} ({} modules)", chunk, update.modules.len());
        let factories: ModuleFactories = update
            .modules
            .into_iter()
            .map(|(id, source)| (id, self.factory(source)))
            .collect();

        registrar.register(chunk, from, factories)
    }
}
