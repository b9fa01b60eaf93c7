//! Module registry.
//!
//! The registry is an arena keyed by module id. Dependency edges are stored as
//! id sets on each record (`parents` = modules that require this one,
//! `children` = modules this one requires), so cycles never turn into
//! ownership cycles.
//!
//! Only [`crate::UpdateApplier`] replaces records once the page has booted.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use hmr_protocol::ModuleId;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

/// Opaque export bag of a module.
pub type Exports = Map<String, Value>;

/// Executable body of a module. Runs once per installed record.
pub type ModuleFactory = Arc<dyn Fn(&mut ModuleScope<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Invoked on an accepting module when one of its accepted dependencies is replaced.
pub type AcceptCallback = Arc<dyn Fn(&AcceptedUpdate) + Send + Sync>;

/// Invoked with the old exports of a replaced record.
pub type DisposeCallback = Box<dyn FnOnce(&Exports) + Send>;

/// Registry shared between the applier and the embedding application.
pub type SharedRegistry = Arc<Mutex<ModuleRegistry>>;

/// Box a closure as a [`ModuleFactory`].
pub fn module_factory<F>(body: F) -> ModuleFactory
where
    F: Fn(&mut ModuleScope<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(body)
}

/// Payload handed to an accept callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedUpdate {
    /// Module that registered the callback.
    pub acceptor: ModuleId,
    /// Accepted dependency the update was reached through.
    pub dependency: ModuleId,
    /// Module whose new body was installed. Equals `dependency` unless the
    /// update bubbled up through modules that did not accept it.
    pub changed: ModuleId,
    /// Current exports of `dependency`.
    pub exports: Exports,
}

/// Per-module hot state (`module.hot`).
#[derive(Default)]
pub struct HotHandle {
    accepted_dependencies: HashMap<ModuleId, AcceptCallback>,
    dispose_handlers: Vec<DisposeCallback>,
}

impl HotHandle {
    /// Contain updates of `dependencies` by running `callback` instead of
    /// escalating. Registering the same dependency again replaces the callback.
    pub fn accept<I, D, F>(&mut self, dependencies: I, callback: F)
    where
        I: IntoIterator<Item = D>,
        D: Into<ModuleId>,
        F: Fn(&AcceptedUpdate) + Send + Sync + 'static,
    {
        let callback: AcceptCallback = Arc::new(callback);
        for dependency in dependencies {
            self.accepted_dependencies
                .insert(dependency.into(), Arc::clone(&callback));
        }
    }

    /// Run `handler` with this module's old exports when it is replaced.
    ///
    /// Handlers run after the registry lock is released and before any
    /// accept callback of the same update.
    pub fn dispose<F>(&mut self, handler: F)
    where
        F: FnOnce(&Exports) + Send + 'static,
    {
        self.dispose_handlers.push(Box::new(handler));
    }

    pub fn accepts(&self, dependency: &ModuleId) -> bool {
        self.accepted_dependencies.contains_key(dependency)
    }

    pub fn accepted_dependencies(&self) -> impl Iterator<Item = &ModuleId> {
        self.accepted_dependencies.keys()
    }

    pub(crate) fn callback_for(&self, dependency: &ModuleId) -> Option<AcceptCallback> {
        self.accepted_dependencies.get(dependency).cloned()
    }

    pub(crate) fn take_dispose_handlers(&mut self) -> Vec<DisposeCallback> {
        std::mem::take(&mut self.dispose_handlers)
    }
}

impl fmt::Debug for HotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut accepted: Vec<_> = self.accepted_dependencies.keys().collect();
        accepted.sort();
        f.debug_struct("HotHandle")
            .field("accepted_dependencies", &accepted)
            .field("dispose_handlers", &self.dispose_handlers.len())
            .finish()
    }
}

/// A loaded module.
#[derive(Debug)]
pub struct ModuleRecord {
    pub id: ModuleId,
    /// True once the factory ran to completion.
    pub loaded: bool,
    pub exports: Exports,
    pub parents: BTreeSet<ModuleId>,
    pub children: BTreeSet<ModuleId>,
    pub hot: Option<HotHandle>,
}

impl ModuleRecord {
    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            loaded: false,
            exports: Exports::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            hot: None,
        }
    }

    /// Fresh record that keeps the dependency edges of a replaced one.
    pub(crate) fn with_edges(
        id: ModuleId,
        parents: BTreeSet<ModuleId>,
        children: BTreeSet<ModuleId>,
    ) -> Self {
        Self {
            parents,
            children,
            ..Self::new(id)
        }
    }

    /// Run `factory` against this record. `loaded` flips only on success.
    pub fn evaluate(&mut self, factory: &ModuleFactory) -> anyhow::Result<()> {
        let hot = self.hot.get_or_insert_with(HotHandle::default);
        let mut scope = ModuleScope {
            id: &self.id,
            exports: &mut self.exports,
            hot,
            children: &mut self.children,
        };
        factory(&mut scope)?;
        self.loaded = true;
        Ok(())
    }
}

/// What a module factory sees while it executes.
pub struct ModuleScope<'a> {
    id: &'a ModuleId,
    exports: &'a mut Exports,
    hot: &'a mut HotHandle,
    children: &'a mut BTreeSet<ModuleId>,
}

impl ModuleScope<'_> {
    pub fn id(&self) -> &ModuleId {
        self.id
    }

    pub fn exports(&self) -> &Exports {
        self.exports
    }

    pub fn exports_mut(&mut self) -> &mut Exports {
        self.exports
    }

    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.exports.insert(name.into(), value.into());
    }

    pub fn hot(&mut self) -> &mut HotHandle {
        self.hot
    }

    /// Declare a dependency. The edge is linked on both records when the
    /// surrounding apply finishes.
    pub fn require(&mut self, dependency: impl Into<ModuleId>) {
        self.children.insert(dependency.into());
    }
}

/// Arena of loaded modules.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleId, ModuleRecord>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn get(&self, id: &ModuleId) -> Option<&ModuleRecord> {
        self.modules.get(id)
    }

    pub fn get_mut(&mut self, id: &ModuleId) -> Option<&mut ModuleRecord> {
        self.modules.get_mut(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.modules.keys()
    }

    pub fn exports(&self, id: &ModuleId) -> Option<&Exports> {
        self.modules.get(id).map(|record| &record.exports)
    }

    /// Insert a record, returning the one it replaced.
    pub fn insert(&mut self, record: ModuleRecord) -> Option<ModuleRecord> {
        self.modules.insert(record.id.clone(), record)
    }

    pub fn remove(&mut self, id: &ModuleId) -> Option<ModuleRecord> {
        self.modules.remove(id)
    }

    /// Record `parent -> child` on whichever ends are loaded.
    pub fn link(&mut self, parent: &ModuleId, child: &ModuleId) {
        if let Some(record) = self.modules.get_mut(parent) {
            record.children.insert(child.clone());
        }
        if let Some(record) = self.modules.get_mut(child) {
            record.parents.insert(parent.clone());
        }
    }

    /// Drop every record. Called when the owning page unloads.
    pub fn clear(&mut self) {
        self.modules.clear();
    }
}
