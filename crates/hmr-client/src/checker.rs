//! Update attempts.
//!
//! An attempt compares the latest announced hash with the applied one,
//! fetches the manifest addressed by the applied hash, loads every changed
//! chunk, and only then patches the registry and advances the applied hash.
//! Attempts never overlap: [`UpdateChecker::request_update`] queues at most
//! one follow-up behind a running attempt and folds further requests into it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hmr_protocol::{BuildHash, ChunkId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::applier::{ApplyReport, ModuleFactories, UpdateApplier};
use crate::error::{HmrError, HmrResult};
use crate::evaluator::ChunkEvaluator;
use crate::registrar::ChunkRegistrar;
use crate::state::ConnectionState;
use crate::transport::UpdateTransport;

pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_MANIFEST_CHAIN: usize = 16;

#[derive(Debug, Clone)]
pub struct CheckerOptions {
    /// How long a fetched chunk may take to register its modules.
    pub chunk_timeout: Duration,
    /// Manifests followed through `h` links in one attempt.
    pub max_manifest_chain: usize,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            max_manifest_chain: DEFAULT_MAX_MANIFEST_CHAIN,
        }
    }
}

/// Result of one update attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Nothing was applied before; the announced hash became the baseline.
    Baseline(Option<BuildHash>),
    /// The applied hash already matches the announced one.
    UpToDate,
    /// The registry was patched and the applied hash moved `from -> to`.
    Applied {
        from: BuildHash,
        to: BuildHash,
        report: ApplyReport,
    },
}

pub struct UpdateChecker {
    state: Arc<ConnectionState>,
    transport: Arc<dyn UpdateTransport>,
    evaluator: Arc<dyn ChunkEvaluator>,
    registrar: Arc<ChunkRegistrar>,
    applier: UpdateApplier,
    options: CheckerOptions,
    flight: Mutex<()>,
    queued: AtomicBool,
}

impl UpdateChecker {
    pub fn new(
        state: Arc<ConnectionState>,
        transport: Arc<dyn UpdateTransport>,
        evaluator: Arc<dyn ChunkEvaluator>,
        applier: UpdateApplier,
        options: CheckerOptions,
    ) -> Self {
        Self {
            state,
            transport,
            evaluator,
            registrar: Arc::new(ChunkRegistrar::new()),
            applier,
            options,
            flight: Mutex::new(()),
            queued: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    pub fn applier(&self) -> &UpdateApplier {
        &self.applier
    }

    pub fn registrar(&self) -> &Arc<ChunkRegistrar> {
        &self.registrar
    }

    /// Run one attempt now, waiting for any attempt in flight to finish first.
    pub async fn attempt_update(&self) -> HmrResult<UpdateOutcome> {
        let _flight = self.flight.lock().await;
        self.attempt_locked().await
    }

    /// Schedule an attempt in the background and log its outcome.
    pub fn request_update(self: &Arc<Self>) -> bool {
        self.request_update_with(|result| match result {
            Ok(outcome) => debug!("Update attempt finished: {:?}", outcome),
            Err(err) => warn!("Update attempt failed: {}", err),
        })
    }

    /// Schedule an attempt in the background and hand its result to
    /// `on_done`.
    ///
    /// Returns false when an attempt is already queued; the request is folded
    /// into that attempt and `on_done` is dropped without being called.
    pub fn request_update_with<F>(self: &Arc<Self>, on_done: F) -> bool
    where
        F: FnOnce(HmrResult<UpdateOutcome>) + Send + 'static,
    {
        if self.queued.swap(true, Ordering::AcqRel) {
            debug!("Update attempt already queued, coalescing request");
            return false;
        }

        let checker = Arc::clone(self);
        tokio::spawn(async move {
            let result = {
                let _flight = checker.flight.lock().await;
                checker.queued.store(false, Ordering::Release);
                checker.attempt_locked().await
            };
            on_done(result);
        });
        true
    }

    async fn attempt_locked(&self) -> HmrResult<UpdateOutcome> {
        let snapshot = self.state.snapshot().await;

        if snapshot.last_applied.is_none() {
            let baseline = self.state.adopt_baseline().await;
            if let Some(hash) = &baseline {
                info!("Baseline hash {}", hash);
            }
            return Ok(UpdateOutcome::Baseline(baseline));
        }
        if !snapshot.is_stale() {
            debug!("Already at {:?}", snapshot.last_applied);
            return Ok(UpdateOutcome::UpToDate);
        }
        let (Some(applied), Some(target)) = (snapshot.last_applied, snapshot.latest_known) else {
            return Ok(UpdateOutcome::UpToDate);
        };

        info!("Updating {} -> {}", applied, target);
        let factories = self.collect_update(&applied, &target).await?;
        let report = self.applier.apply_modules(factories).await;
        self.state.commit(target.clone()).await;

        Ok(UpdateOutcome::Applied {
            from: applied,
            to: target,
            report,
        })
    }

    /// Fetch and register every chunk between `applied` and `target` without
    /// touching the registry.
    async fn collect_update(
        &self,
        applied: &BuildHash,
        target: &BuildHash,
    ) -> HmrResult<ModuleFactories> {
        let mut factories = ModuleFactories::new();
        let mut from = applied.clone();
        let mut steps = 0;

        loop {
            let manifest = self.transport.fetch_manifest(&from).await?;
            let chunks: Vec<ChunkId> = manifest.chunk_ids().cloned().collect();
            debug!("Manifest {} lists {} changed chunks", from, chunks.len());

            for chunk in chunks {
                // Later manifests in a chain win for modules changed twice.
                factories.extend(self.load_chunk(&chunk, &from).await?);
            }

            match manifest.next_hash {
                Some(next) if &next != target => {
                    steps += 1;
                    if steps >= self.options.max_manifest_chain {
                        return Err(HmrError::ManifestChain {
                            from: applied.clone(),
                            target: target.clone(),
                            limit: self.options.max_manifest_chain,
                        });
                    }
                    debug!("Manifest {} leads to {}, following", from, next);
                    from = next;
                }
                _ => return Ok(factories),
            }
        }
    }

    async fn load_chunk(&self, chunk: &ChunkId, from: &BuildHash) -> HmrResult<ModuleFactories> {
        let pending = self.registrar.expect(chunk, from);

        let loaded = match self.transport.fetch_chunk(chunk, from).await {
            Ok(body) => self
                .evaluator
                .evaluate(chunk, from, &body, &self.registrar),
            Err(err) => Err(err),
        };
        if let Err(err) = loaded {
            self.registrar.cancel(chunk, from);
            return Err(err);
        }

        let modules = pending.wait(self.options.chunk_timeout).await;
        if modules.is_err() {
            self.registrar.cancel(chunk, from);
        }
        modules
    }
}
