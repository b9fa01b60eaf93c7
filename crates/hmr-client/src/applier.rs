//! Installs new module factories and propagates the change to acceptors.

use std::collections::{BTreeMap, HashSet, VecDeque};

use hmr_protocol::ModuleId;
use tracing::{debug, info, warn};

use crate::registry::{
    AcceptCallback, AcceptedUpdate, DisposeCallback, Exports, ModuleFactory, ModuleRecord,
    ModuleRegistry, SharedRegistry,
};

/// Factories registered by one update chunk.
pub type ModuleFactories = BTreeMap<ModuleId, ModuleFactory>;

/// A dependency update that an ancestor contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub acceptor: ModuleId,
    pub dependency: ModuleId,
    /// Replaced module that triggered the callback.
    pub changed: ModuleId,
}

/// A module whose new factory failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFailure {
    pub id: ModuleId,
    pub message: String,
}

/// Outcome of [`UpdateApplier::apply_modules`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Modules that did not exist before this update.
    pub added: Vec<ModuleId>,
    /// Existing modules that were replaced.
    pub updated: Vec<ModuleId>,
    /// Accept callbacks that ran.
    pub accepted: Vec<Acceptance>,
    /// Replaced modules with no accepting ancestor on some path.
    pub uncontained: Vec<ModuleId>,
    /// Modules whose factory returned an error.
    pub failed: Vec<ModuleFailure>,
}

impl ApplyReport {
    /// True when every change was contained and every factory succeeded.
    pub fn is_contained(&self) -> bool {
        self.uncontained.is_empty() && self.failed.is_empty()
    }

    /// Modules that force the caller's fallback policy.
    pub fn escalated(&self) -> Vec<ModuleId> {
        self.uncontained
            .iter()
            .chain(self.failed.iter().map(|failure| &failure.id))
            .cloned()
            .collect()
    }

    pub fn merge(&mut self, other: ApplyReport) {
        self.added.extend(other.added);
        self.updated.extend(other.updated);
        self.accepted.extend(other.accepted);
        self.uncontained.extend(other.uncontained);
        self.failed.extend(other.failed);
    }
}

/// Accept callbacks found for one replaced module.
struct Propagation {
    acceptors: Vec<(ModuleId, ModuleId, AcceptCallback)>,
    contained: bool,
}

/// Patches the registry with new factories.
#[derive(Clone)]
pub struct UpdateApplier {
    registry: SharedRegistry,
}

impl UpdateApplier {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Replace or install every module in `factories`.
    ///
    /// The registry is mutated without suspending once the lock is held.
    /// Dispose handlers and then accept callbacks run after the lock is
    /// released, so they may lock the registry themselves.
    pub async fn apply_modules(&self, factories: ModuleFactories) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut disposals = Vec::new();
        let mut pending = Vec::new();

        {
            let mut registry = self.registry.lock().await;
            let mut installed = Vec::with_capacity(factories.len());

            for (id, factory) in factories {
                let existed = install(&mut registry, &id, &factory, &mut report, &mut disposals);
                installed.push((id, existed));
            }

            // Children declared by the new bodies may be installed later in the
            // same batch, so edges are linked after every body has run.
            for (id, _) in &installed {
                let children: Vec<ModuleId> = registry
                    .get(id)
                    .map(|record| record.children.iter().cloned().collect())
                    .unwrap_or_default();
                for child in &children {
                    registry.link(id, child);
                }
            }

            for (id, existed) in &installed {
                if !existed || report.failed.iter().any(|failure| &failure.id == id) {
                    continue;
                }

                let propagation = find_acceptors(&registry, id);
                if !propagation.contained {
                    warn!("Update to {} is not accepted by any ancestor", id);
                    report.uncontained.push(id.clone());
                }
                for (acceptor, dependency, callback) in propagation.acceptors {
                    let exports = registry.exports(&dependency).cloned().unwrap_or_default();
                    report.accepted.push(Acceptance {
                        acceptor: acceptor.clone(),
                        dependency: dependency.clone(),
                        changed: id.clone(),
                    });
                    pending.push((
                        callback,
                        AcceptedUpdate {
                            acceptor,
                            dependency,
                            changed: id.clone(),
                            exports,
                        },
                    ));
                }
            }
        }

        for (id, old_exports, handlers) in disposals {
            debug!("Running {} dispose handlers of {}", handlers.len(), id);
            for handler in handlers {
                handler(&old_exports);
            }
        }

        for (callback, update) in pending {
            debug!(
                "Running accept handler of {} for {}",
                update.acceptor, update.dependency
            );
            callback(&update);
        }

        info!(
            "Applied {} new and {} updated modules ({} accepted, {} uncontained, {} failed)",
            report.added.len(),
            report.updated.len(),
            report.accepted.len(),
            report.uncontained.len(),
            report.failed.len()
        );
        report
    }
}

/// Dispose handlers of one replaced record with the exports they see.
type Disposal = (ModuleId, Exports, Vec<DisposeCallback>);

/// Swap in a fresh record for `id`, returning whether one existed before.
/// Dispose handlers of the old record are queued on `disposals`.
fn install(
    registry: &mut ModuleRegistry,
    id: &ModuleId,
    factory: &ModuleFactory,
    report: &mut ApplyReport,
    disposals: &mut Vec<Disposal>,
) -> bool {
    let (mut record, existed) = match registry.remove(id) {
        Some(mut old) => {
            let handlers = old
                .hot
                .as_mut()
                .map(|hot| hot.take_dispose_handlers())
                .unwrap_or_default();
            if !handlers.is_empty() {
                disposals.push((id.clone(), old.exports, handlers));
            }
            (
                ModuleRecord::with_edges(id.clone(), old.parents, old.children),
                true,
            )
        }
        None => (ModuleRecord::new(id.clone()), false),
    };
    if existed {
        report.updated.push(id.clone());
    } else {
        report.added.push(id.clone());
    }

    if let Err(err) = record.evaluate(factory) {
        warn!("Module {} failed to evaluate: {:#}", id, err);
        report.failed.push(ModuleFailure {
            id: id.clone(),
            message: format!("{err:#}"),
        });
    }

    registry.insert(record);
    existed
}

/// Walk parents of `changed` until every path hits an acceptor.
///
/// A parent that does not accept the module it was reached through is itself
/// affected, so the search continues with its own parents. Reaching a module
/// without live parents means that path escalates. Already visited modules
/// are not searched twice, which cuts dependency cycles.
fn find_acceptors(registry: &ModuleRegistry, changed: &ModuleId) -> Propagation {
    let mut acceptors = Vec::new();
    let mut contained = true;
    let mut visited = HashSet::from([changed.clone()]);
    let mut queue = VecDeque::from([changed.clone()]);

    while let Some(current) = queue.pop_front() {
        let Some(record) = registry.get(&current) else {
            continue;
        };

        let mut live_parents = 0;
        for parent_id in &record.parents {
            let Some(parent) = registry.get(parent_id) else {
                continue;
            };
            live_parents += 1;

            match parent.hot.as_ref().and_then(|hot| hot.callback_for(&current)) {
                Some(callback) => acceptors.push((parent_id.clone(), current.clone(), callback)),
                None => {
                    if visited.insert(parent_id.clone()) {
                        queue.push_back(parent_id.clone());
                    }
                }
            }
        }

        if live_parents == 0 {
            contained = false;
        }
    }

    // A closed cycle has no parentless module but no acceptor either.
    let contained = contained && !acceptors.is_empty();
    Propagation {
        acceptors,
        contained,
    }
}
