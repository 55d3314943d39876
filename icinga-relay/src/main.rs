use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use icinga_relay::app::Relay;
use icinga_relay::config::AppConfig;
use icinga_relay::logging;

/// Relays Icinga 2 state changes to notification channels.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file.
    #[arg(
        short,
        long,
        env = "ICINGA_RELAY_CONFIG",
        default_value = "icinga-relay.toml"
    )]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if args.check {
        println!("{}: configuration OK", args.config.display());
        return Ok(());
    }

    let _guard = logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting icinga-relay"
    );

    let cancellation_token = CancellationToken::new();
    let relay = Relay::new(config, cancellation_token.clone())?.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    relay.shutdown().await;
    Ok(())
}
