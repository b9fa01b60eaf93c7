//! Development server for hot module replacement.
//!
//! Watches sources, runs the compiler one build at a time, announces every
//! finished build to connected clients over `/__hmr`, and serves the output
//! directory (including hot-update manifests and chunks) over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

pub mod assets;
pub mod broadcaster;
pub mod compiler;
pub mod config;
pub mod error;
pub mod routes;
pub mod watcher;
pub mod ws;

pub use broadcaster::{ClientId, NotificationBroadcaster};
pub use compiler::{ChunkDescriptor, CommandCompiler, CompileError, CompileResult, Compiler};
pub use config::{BuildConfig, HttpConfig, ServerConfig};
pub use error::ServerError;
pub use routes::{SOCKET_PATH, app, hmr_routes};
pub use watcher::{BuildEvent, BuildListener, BuildPipeline, CompileWatcher, WatchFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Directory the compiler writes to
    pub output_dir: PathBuf,
    pub broadcaster: Arc<NotificationBroadcaster>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, broadcaster: Arc<NotificationBroadcaster>) -> Self {
        Self {
            output_dir: config.build.output_dir.clone(),
            broadcaster,
            config: Arc::new(config),
        }
    }
}
