use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pairclaw::app::App;
use pairclaw::config::Config;
use pairclaw::session::UnconfiguredConnector;

#[derive(Parser, Debug)]
#[command(name = "pairclaw")]
#[command(about = "Pairing-code session service for a remote messaging account")]
#[command(version)]
struct Cli {
    /// HTTP listen port
    #[arg(short, long, env = "PAIRCLAW_PORT")]
    port: Option<u16>,

    /// Credential file path
    #[arg(long, env = "PAIRCLAW_CREDS_PATH")]
    creds_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(path) = cli.creds_path {
        config.creds_path = path;
    }

    tracing::info!(
        port = config.port,
        creds_path = %config.creds_path.display(),
        "Starting pairclaw"
    );
    if let Some(url) = &config.public_url {
        tracing::info!("Public base URL: {}", url);
    }
    tracing::warn!(
        "No protocol backend linked; connection supervision will idle until one is configured"
    );

    let mut app =
        App::new(&config, Arc::new(UnconfiguredConnector)).context("assembling service")?;
    app.start().await.context("starting service")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    app.shutdown().await;

    Ok(())
}
