use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides, e.g. `HMR__SERVER__PORT=8080`.
pub const ENV_PREFIX: &str = "HMR";

/// Dev server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

/// Listener and push endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval between WebSocket pings (seconds)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

/// Compiler invocation and source watching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build command and arguments. Empty disables building.
    #[serde(default)]
    pub command: Vec<String>,

    /// Working directory of the build command
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Directory watched for source changes
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,

    /// Directory the compiler writes to; served over HTTP
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// JSON stats file the compiler writes after each build
    #[serde(default = "default_stats_file")]
    pub stats_file: PathBuf,

    /// Quiet period after a source change before building (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Directory names never watched
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    /// Build once at startup
    #[serde(default = "default_initial_build")]
    pub initial_build: bool,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    41900
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("src")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_stats_file() -> PathBuf {
    PathBuf::from("dist/hmr-stats.json")
}

fn default_debounce_ms() -> u64 {
    250
}

fn default_ignored_dirs() -> Vec<String> {
    vec![
        ".git".to_string(),
        "node_modules".to_string(),
        "__pycache__".to_string(),
        ".cache".to_string(),
        "target".to_string(),
        ".venv".to_string(),
    ]
}

fn default_initial_build() -> bool {
    true
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            working_dir: default_working_dir(),
            watch_dir: default_watch_dir(),
            output_dir: default_output_dir(),
            stats_file: default_stats_file(),
            debounce_ms: default_debounce_ms(),
            ignored_dirs: default_ignored_dirs(),
            initial_build: default_initial_build(),
        }
    }
}

impl ServerConfig {
    /// Layer defaults, the optional TOML file and `HMR__*` environment
    /// variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.bind", default_bind())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("build.debounce_ms", default_debounce_ms() as i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let built = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        built.try_deserialize()
    }
}

impl HttpConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

impl BuildConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// True when a build command is configured.
    pub fn is_enabled(&self) -> bool {
        !self.command.is_empty()
    }
}
