//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hmr_client::{
    CheckerOptions, ConnectionState, DataChunkEvaluator, HmrError, HmrResult, ModuleFactories,
    ModuleRegistry, SharedRegistry, UpdateApplier, UpdateChecker, UpdateTransport, module_factory,
};
use hmr_protocol::{BuildHash, ChunkId, ModuleId, UpdateManifest, chunk_path, manifest_path};
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};

pub fn hash(value: &str) -> BuildHash {
    BuildHash::new(value).unwrap()
}

pub fn chunk(value: &str) -> ChunkId {
    ChunkId::new(value).unwrap()
}

/// Body of a data chunk that sets `title` on each listed module.
pub fn title_chunk(chunk: &str, modules: &[(&str, &str)]) -> String {
    let modules: serde_json::Map<String, Value> = modules
        .iter()
        .map(|(id, title)| (id.to_string(), json!({ "exports": { "title": title } })))
        .collect();
    json!({ "id": chunk, "modules": modules }).to_string()
}

/// In-memory stand-in for the dev server's static files.
#[derive(Default)]
pub struct MockTransport {
    assets: Mutex<HashMap<String, Bytes>>,
    failing: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose manifest requests each wait for a permit on the
    /// returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (transport, gate)
    }

    /// Notified whenever a manifest request starts.
    pub fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }

    pub fn manifest(&self, from: &str, body: Value) {
        self.assets
            .lock()
            .unwrap()
            .insert(manifest_path(&hash(from)), Bytes::from(body.to_string()));
    }

    pub fn chunk(&self, id: &str, from: &str, body: String) {
        self.assets
            .lock()
            .unwrap()
            .insert(chunk_path(&chunk(id), &hash(from)), Bytes::from(body));
    }

    pub fn raw(&self, path: &str, body: &'static str) {
        self.assets
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::from_static(body.as_bytes()));
    }

    /// Answer `path` with a server error until [`Self::recover`].
    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn recover(&self, path: &str) {
        self.failing.lock().unwrap().remove(path);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests().iter().filter(|p| p.as_str() == path).count()
    }

    fn get(&self, path: String) -> HmrResult<Bytes> {
        self.requests.lock().unwrap().push(path.clone());
        let url = format!("http://mock{path}");
        if self.failing.lock().unwrap().contains(&path) {
            return Err(HmrError::Status { url, status: 500 });
        }
        self.assets
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .ok_or(HmrError::Status { url, status: 404 })
    }
}

#[async_trait]
impl UpdateTransport for MockTransport {
    async fn fetch_manifest(&self, from: &BuildHash) -> HmrResult<UpdateManifest> {
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let path = manifest_path(from);
        let body = self.get(path.clone())?;
        UpdateManifest::from_slice(&body).map_err(|e| HmrError::MalformedManifest {
            url: format!("http://mock{path}"),
            message: e.to_string(),
        })
    }

    async fn fetch_chunk(&self, chunk: &ChunkId, from: &BuildHash) -> HmrResult<Bytes> {
        self.get(chunk_path(chunk, from))
    }
}

/// Registry after the initial page load: `./index.js` requires
/// `./title.js` and, when `accepting`, accepts its updates.
pub async fn booted_registry(accepting: bool) -> SharedRegistry {
    let registry = ModuleRegistry::new().into_shared();
    let mut factories = ModuleFactories::new();
    factories.insert(
        ModuleId::from("./index.js"),
        module_factory(move |scope| {
            scope.require("./title.js");
            if accepting {
                scope.hot().accept(["./title.js"], |_| {});
            }
            Ok(())
        }),
    );
    factories.insert(
        ModuleId::from("./title.js"),
        module_factory(|scope| {
            scope.export("title", "v1");
            Ok(())
        }),
    );
    UpdateApplier::new(Arc::clone(&registry))
        .apply_modules(factories)
        .await;
    registry
}

pub fn checker_with(
    state: ConnectionState,
    transport: Arc<MockTransport>,
    registry: SharedRegistry,
    options: CheckerOptions,
) -> Arc<UpdateChecker> {
    Arc::new(UpdateChecker::new(
        Arc::new(state),
        transport,
        Arc::new(DataChunkEvaluator::new()),
        UpdateApplier::new(registry),
        options,
    ))
}

pub fn checker(
    state: ConnectionState,
    transport: Arc<MockTransport>,
    registry: SharedRegistry,
) -> Arc<UpdateChecker> {
    checker_with(
        state,
        transport,
        registry,
        CheckerOptions {
            chunk_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    )
}

/// Current `title` export of `id`.
pub async fn title_of(registry: &SharedRegistry, id: &str) -> Value {
    registry
        .lock()
        .await
        .exports(&ModuleId::from(id))
        .and_then(|exports| exports.get("title").cloned())
        .unwrap_or(Value::Null)
}
