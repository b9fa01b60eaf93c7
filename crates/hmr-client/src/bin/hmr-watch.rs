use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hmr_client::{
    ClientConfig, ClientNotice, DataChunkEvaluator, FallbackPolicy, HotClient, ModuleRegistry,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hmr-watch")]
#[command(about = "Headless hot update client for smoke testing a dev server")]
#[command(version)]
struct Cli {
    /// Dev server base URL
    #[arg(short, long, env = "HMR_WATCH_SERVER")]
    server: Option<String>,

    /// Fallback policy for uncontained updates
    #[arg(long, value_enum, env = "HMR_WATCH_POLICY")]
    policy: Option<FallbackPolicy>,

    /// Exit with an error when an update requires a reload
    #[arg(long)]
    exit_on_reload: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "HMR_WATCH_VERBOSE")]
    verbose: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "HMR_WATCH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "hmr_watch=debug,hmr_client=debug"
    } else {
        "hmr_watch=info,hmr_client=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if let Some(config_path) = &cli.config {
        ClientConfig::from_file(config_path)?
    } else {
        ClientConfig::default()
    };
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(policy) = cli.policy {
        config.policy = policy;
    }

    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();

    let client = Arc::new(
        HotClient::new(
            config,
            ModuleRegistry::new().into_shared(),
            Arc::new(DataChunkEvaluator::with_accept_channel(accepted_tx)),
        )?
        .with_notices(notice_tx),
    );

    info!("Probing {}", client.config().server_url);

    let runner = Arc::clone(&client);
    let connection = tokio::spawn(async move { runner.run().await });

    loop {
        tokio::select! {
            Some(update) = accepted_rx.recv() => {
                info!("{} accepted {} (changed {}): {}", update.acceptor, update.dependency,
                    update.changed, serde_json::Value::Object(update.exports));
            }
            Some(notice) = notice_rx.recv() => match notice {
                ClientNotice::Baseline { hash } => info!("Baseline {}", hash),
                ClientNotice::Updated { from, to, report } => {
                    info!("Updated {} -> {}: {:?}", from, to, report);
                }
                ClientNotice::ReloadRequired { hash, modules } => {
                    warn!("Reload required at {} for {:?}", hash, modules);
                    if cli.exit_on_reload {
                        anyhow::bail!("update to {hash} was not contained");
                    }
                }
                ClientNotice::UpdateFailed { error } => warn!("Update failed: {}", error),
            },
            else => break,
        }
    }

    connection.await??;
    Ok(())
}
