use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hmr_server::{
    AppState, BuildPipeline, CommandCompiler, NotificationBroadcaster, SOCKET_PATH, ServerConfig,
    app,
};

#[derive(Parser, Debug)]
#[command(name = "hmr-server")]
#[command(about = "Dev server that rebuilds on change and pushes hot updates")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "HMR_PORT")]
    port: Option<u16>,

    /// Address to bind to
    #[arg(short, long, env = "HMR_BIND")]
    bind: Option<String>,

    /// Directory to serve compiled output from
    #[arg(short, long, env = "HMR_OUTPUT")]
    output: Option<PathBuf>,

    /// Config file path (optional)
    #[arg(short, long, env = "HMR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, env = "HMR_VERBOSE")]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, env = "HMR_JSON")]
    json: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        "hmr_server=debug,tower_http=debug"
    } else {
        "hmr_server=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(output) = cli.output {
        config.build.output_dir = output;
    }

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    init_tracing(cli.verbose, cli.json);

    if !config.build.output_dir.is_dir() {
        std::fs::create_dir_all(&config.build.output_dir).with_context(|| {
            format!(
                "creating output directory {}",
                config.build.output_dir.display()
            )
        })?;
    }
    info!("Serving files from: {}", config.build.output_dir.display());

    let broadcaster = Arc::new(NotificationBroadcaster::new());

    let _pipeline = if config.build.is_enabled() {
        let compiler = CommandCompiler::from_config(&config.build)?;
        let pipeline = BuildPipeline::spawn(&config.build, Arc::new(compiler), broadcaster.clone())
            .with_context(|| format!("watching {}", config.build.watch_dir.display()))?;
        Some(pipeline)
    } else {
        warn!("No build command configured; serving static output only");
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("parsing listen address")?;
    let router = app(AppState::new(config, broadcaster));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Starting hmr-server on {} (socket at {})", addr, SOCKET_PATH);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    Ok(())
}
