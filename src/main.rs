//! wallet-sentry binary: loads config, restores any persisted wallet session
//! and serves the UI boundary until terminated.

use clap::Parser;
use std::path::PathBuf;

use wallet_sentry::config::{load_config, SentryConfig};
use wallet_sentry::lifecycle::{signals, Shutdown, WalletSentry};
use wallet_sentry::observability::logging;

#[derive(Parser)]
#[command(name = "wallet-sentry")]
#[command(about = "Wallet connectivity and transaction relay core", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SentryConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(config = ?cli.config, "wallet-sentry v{} starting", env!("CARGO_PKG_VERSION"));

    // Wallet traffic is a handful of sockets; one thread is enough.
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async move {
        let shutdown = Shutdown::new();
        signals::spawn_signal_handler(shutdown.clone());

        let sentry = WalletSentry::from_config(config)?;
        sentry.run(shutdown).await?;

        tracing::info!("Shutdown complete");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
