//! Test utilities and common setup.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hmr_protocol::BuildHash;
use hmr_server::{AppState, NotificationBroadcaster, ServerConfig, app};
use tempfile::TempDir;

pub fn hash(value: &str) -> BuildHash {
    BuildHash::new(value).unwrap()
}

/// A server over a temporary output directory.
pub struct TestServer {
    pub app: Router,
    pub broadcaster: Arc<NotificationBroadcaster>,
    pub output: TempDir,
}

impl TestServer {
    pub fn write(&self, path: &str, body: &str) {
        let path = self.output.path().join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    pub fn output_path(&self) -> &Path {
        self.output.path()
    }
}

/// Create a test application serving a small build output.
pub fn test_app() -> TestServer {
    let output = tempfile::tempdir().unwrap();

    let mut config = ServerConfig::default();
    config.build.output_dir = output.path().to_path_buf();
    config.server.ping_interval_secs = 1;

    let broadcaster = Arc::new(NotificationBroadcaster::new());
    let app = app(AppState::new(config, Arc::clone(&broadcaster)));

    let server = TestServer {
        app,
        broadcaster,
        output,
    };
    server.write("index.html", "<!doctype html><script src=\"/main.js\"></script>");
    server.write("main.js", "console.log('main');");
    server.write("abc123.hot-update.json", r#"{"c":{"main":["./title.js"]}}"#);
    server.write(
        "main.abc123.hot-update.js",
        r#"{"id":"main","modules":{"./title.js":{"exports":{"title":"v2"}}}}"#,
    );
    server.write("docs/index.html", "<h1>docs</h1>");
    server
}

/// Serve `server` on an ephemeral local port.
pub async fn spawn_server(server: &TestServer) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Wait until `broadcaster` has `count` registered clients.
pub async fn wait_for_clients(broadcaster: &NotificationBroadcaster, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broadcaster.client_count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients did not connect in time");
}
