mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kickoff_feed::{slot, FootballDataClient, Producer};
use kickoff_server::ConnectionRegistry;
use kickoff_telemetry::init_telemetry;
use tracing::{info, warn};

use crate::settings::{load_env_file, Overrides, Settings, ENV_FILE};

/// Fetches football match data on a schedule and streams per-listener
/// filtered views over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "kickoff", version)]
struct Cli {
    /// JSON config file (default: kickoff.json if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Before settings, so the env layers see it. Reported once logging is up.
    let env_file = load_env_file(Path::new(ENV_FILE));
    let settings = Settings::load(&Overrides {
        config: cli.config,
        host: cli.host,
        port: cli.port,
    })
    .context("failed to load settings")?;

    let telemetry = init_telemetry(&settings.telemetry_config()?)
        .context("failed to initialize telemetry")?;
    match env_file {
        Ok(true) => info!(path = ENV_FILE, "loaded env file"),
        Ok(false) => info!("no .env file, using the process environment"),
        Err(e) => warn!(error = %e, "ignoring unreadable env file"),
    }

    // The only fatal credential check; nothing has started yet.
    let feed = settings.feed_config()?;
    let client = FootballDataClient::new(&feed).context("failed to build HTTP client")?;

    let registry = Arc::new(ConnectionRegistry::new());
    let (publisher, documents) = slot::channel();

    let server = kickoff_server::start(
        settings.server.clone(),
        registry,
        documents,
        telemetry.metrics().cloned(),
    )
    .await?;
    let producer = Producer::new(client, publisher, feed.cadence).spawn();

    info!(
        port = server.port(),
        cadence = %feed.cadence,
        base_url = %feed.base_url,
        "kickoff ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    info!("shutting down");
    producer.abort();
    server.abort();
    Ok(())
}
