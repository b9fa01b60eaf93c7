//! Source watching and the build loop.
//!
//! ```text
//! notify --(debounced)--> triggers --> run_builds --> BuildEvent --> CompileWatcher --> BuildListener
//! ```
//!
//! Triggers are coalesced while a build is queued, builds run one at a time,
//! and every finished build reaches the listener exactly once, in order.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::compiler::{CompileResult, Compiler};
use crate::config::BuildConfig;

/// Receives finished builds.
pub trait BuildListener: Send + Sync {
    fn build_completed(&self, result: &CompileResult);
}

/// Outcome of one build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Finished(CompileResult),
    Failed(String),
}

/// Forwards finished builds to a [`BuildListener`].
pub struct CompileWatcher {
    listener: Arc<dyn BuildListener>,
}

impl CompileWatcher {
    pub fn new(listener: Arc<dyn BuildListener>) -> Self {
        Self { listener }
    }

    /// Handle one build event. Failed builds never reach the listener.
    pub fn handle(&self, event: BuildEvent) {
        match event {
            BuildEvent::Finished(result) => {
                debug!("Build {} complete", result.hash);
                self.listener.build_completed(&result);
            }
            BuildEvent::Failed(message) => {
                debug!("Build failed, clients stay on their hash: {}", message);
            }
        }
    }

    /// Consume build events until the sender side closes.
    pub async fn run(&self, mut events: mpsc::Receiver<BuildEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("Build event channel closed");
    }
}

/// Run a build per trigger, strictly one at a time.
pub async fn run_builds(
    compiler: Arc<dyn Compiler>,
    mut triggers: mpsc::Receiver<()>,
    events: mpsc::Sender<BuildEvent>,
    initial_build: bool,
) {
    if initial_build && !build_once(compiler.as_ref(), &events).await {
        return;
    }
    while triggers.recv().await.is_some() {
        if !build_once(compiler.as_ref(), &events).await {
            return;
        }
    }
}

async fn build_once(compiler: &dyn Compiler, events: &mpsc::Sender<BuildEvent>) -> bool {
    let event = match compiler.compile().await {
        Ok(result) => BuildEvent::Finished(result),
        Err(err) => BuildEvent::Failed(err.to_string()),
    };
    events.send(event).await.is_ok()
}

/// Decides which file system paths can trigger a build.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    watch_dir: PathBuf,
    output_dir: PathBuf,
    ignored_dirs: HashSet<String>,
}

impl WatchFilter {
    pub fn new(watch_dir: PathBuf, output_dir: PathBuf, ignored_dirs: &[String]) -> Self {
        Self {
            watch_dir,
            output_dir,
            ignored_dirs: ignored_dirs.iter().cloned().collect(),
        }
    }

    pub fn from_config(build: &BuildConfig) -> Self {
        let canonical = |path: &Path| path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Self::new(
            canonical(&build.watch_dir),
            canonical(&build.output_dir),
            &build.ignored_dirs,
        )
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if path.starts_with(&self.output_dir) {
            return true;
        }
        let relative = path.strip_prefix(&self.watch_dir).unwrap_or(path);
        relative.components().any(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .is_some_and(|name| self.ignored_dirs.contains(name)),
            _ => false,
        })
    }

    /// True when `event` changes at least one watched path.
    pub fn is_relevant(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        event.paths.iter().any(|path| !self.is_ignored(path))
    }
}

/// Watch `filter`'s directory and send a build trigger once changes have
/// been quiet for `debounce`. A trigger is dropped when one is already
/// queued, since the queued build will see the change.
pub fn watch_sources(
    filter: WatchFilter,
    debounce: Duration,
    triggers: mpsc::Sender<()>,
) -> notify::Result<JoinHandle<()>> {
    let (tx, mut rx) = mpsc::channel(128);
    let mut watcher = notify::recommended_watcher(move |res| {
        if tx.blocking_send(res).is_err() {
            debug!("Source watch channel closed");
        }
    })?;
    watcher.watch(&filter.watch_dir, RecursiveMode::Recursive)?;
    info!("Watching {}", filter.watch_dir.display());

    Ok(tokio::spawn(async move {
        // Dropping the watcher stops the notifications.
        let _watcher = watcher;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                incoming = rx.recv() => {
                    match incoming {
                        Some(Ok(event)) => {
                            if filter.is_relevant(&event) {
                                debug!("Source change: {:?}", event.paths);
                                deadline = Some(Instant::now() + debounce);
                            }
                        }
                        Some(Err(err)) => warn!("Watcher error: {:?}", err),
                        None => break,
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    match triggers.try_send(()) {
                        Ok(()) => debug!("Build triggered"),
                        Err(mpsc::error::TrySendError::Full(())) => {
                            debug!("Build already queued, coalescing change");
                        }
                        Err(mpsc::error::TrySendError::Closed(())) => break,
                    }
                }
            }
        }
    }))
}

/// Running build pipeline: source watcher, build loop and compile watcher.
pub struct BuildPipeline {
    tasks: Vec<JoinHandle<()>>,
}

impl BuildPipeline {
    pub fn spawn(
        build: &BuildConfig,
        compiler: Arc<dyn Compiler>,
        listener: Arc<dyn BuildListener>,
    ) -> notify::Result<Self> {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::channel(16);

        let watch = match watch_sources(
            WatchFilter::from_config(build),
            build.debounce(),
            trigger_tx,
        ) {
            Ok(handle) => handle,
            Err(err) => {
                error!(
                    "Failed to watch {}: {:?}",
                    build.watch_dir.display(),
                    err
                );
                return Err(err);
            }
        };

        let builds = tokio::spawn(run_builds(
            compiler,
            trigger_rx,
            event_tx,
            build.initial_build,
        ));

        let compile_watcher = CompileWatcher::new(listener);
        let forward = tokio::spawn(async move { compile_watcher.run(event_rx).await });

        Ok(Self {
            tasks: vec![watch, builds, forward],
        })
    }

    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for BuildPipeline {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileError;
    use async_trait::async_trait;
    use hmr_protocol::BuildHash;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Compiler returning scripted results, one per call.
    struct ScriptedCompiler {
        results: Mutex<VecDeque<Result<CompileResult, CompileError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedCompiler {
        fn new(results: Vec<Result<CompileResult, CompileError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Compiler for ScriptedCompiler {
        async fn compile(&self) -> Result<CompileResult, CompileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(CompileError::NotConfigured))
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        hashes: Mutex<Vec<BuildHash>>,
    }

    impl BuildListener for RecordingListener {
        fn build_completed(&self, result: &CompileResult) {
            self.hashes.lock().unwrap().push(result.hash.clone());
        }
    }

    fn built(hash: &str) -> Result<CompileResult, CompileError> {
        Ok(CompileResult {
            hash: BuildHash::new(hash).unwrap(),
            chunks: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_every_finished_build_reaches_listener_in_order() {
        let listener = Arc::new(RecordingListener::default());
        let watcher = CompileWatcher::new(listener.clone());
        let (tx, rx) = mpsc::channel(8);

        tx.send(BuildEvent::Finished(built("h1").unwrap())).await.unwrap();
        tx.send(BuildEvent::Failed("syntax error".into())).await.unwrap();
        tx.send(BuildEvent::Finished(built("h2").unwrap())).await.unwrap();
        tx.send(BuildEvent::Finished(built("h3").unwrap())).await.unwrap();
        drop(tx);

        watcher.run(rx).await;

        let hashes: Vec<String> = listener
            .hashes
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.to_string())
            .collect();
        assert_eq!(hashes, vec!["h1", "h2", "h3"]);
    }

    #[tokio::test]
    async fn test_run_builds_builds_initially_and_per_trigger() {
        let compiler = Arc::new(ScriptedCompiler::new(vec![
            built("h1"),
            Err(CompileError::Failed {
                status: "exit status: 1".into(),
            }),
            built("h2"),
        ]));
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (event_tx, mut event_rx) = mpsc::channel(8);

        let builds = tokio::spawn(run_builds(compiler.clone(), trigger_rx, event_tx, true));

        assert_eq!(
            event_rx.recv().await,
            Some(BuildEvent::Finished(built("h1").unwrap()))
        );
        trigger_tx.send(()).await.unwrap();
        assert!(matches!(event_rx.recv().await, Some(BuildEvent::Failed(_))));
        trigger_tx.send(()).await.unwrap();
        assert_eq!(
            event_rx.recv().await,
            Some(BuildEvent::Finished(built("h2").unwrap()))
        );

        drop(trigger_tx);
        builds.await.unwrap();
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_filter_ignores_output_and_hidden_dirs() {
        let filter = WatchFilter::new(
            PathBuf::from("/project"),
            PathBuf::from("/project/dist"),
            &["node_modules".to_string(), ".git".to_string()],
        );

        assert!(!filter.is_ignored(Path::new("/project/src/index.js")));
        assert!(filter.is_ignored(Path::new("/project/dist/main.js")));
        assert!(filter.is_ignored(Path::new("/project/node_modules/lib/index.js")));
        assert!(filter.is_ignored(Path::new("/project/.git/HEAD")));
    }

    #[test]
    fn test_filter_only_checks_components_below_watch_dir() {
        let filter = WatchFilter::new(
            PathBuf::from("/home/dev/target/app"),
            PathBuf::from("/home/dev/target/app/dist"),
            &["target".to_string()],
        );
        assert!(!filter.is_ignored(Path::new("/home/dev/target/app/src/a.js")));
    }

    #[test]
    fn test_access_events_are_not_relevant() {
        let filter = WatchFilter::new(PathBuf::from("/p"), PathBuf::from("/p/dist"), &[]);
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/p/src/a.js"));
        let modify = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/p/src/a.js"));

        assert!(!filter.is_relevant(&access));
        assert!(filter.is_relevant(&modify));
    }

    #[tokio::test]
    async fn test_source_change_triggers_build() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let filter = WatchFilter::new(root.clone(), root.join("dist"), &[]);
        let (tx, mut rx) = mpsc::channel(1);

        let handle = watch_sources(filter, Duration::from_millis(50), tx).unwrap();
        // Give the backend a moment to install its watches.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(root.join("index.js"), "export default 1;").unwrap();

        let triggered = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        handle.abort();
        assert_eq!(triggered.unwrap(), Some(()));
    }
}
