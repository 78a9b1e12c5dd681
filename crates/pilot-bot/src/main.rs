//! pilot spot trading bot - entry point.

use anyhow::Result;
use clap::Parser;
use pilot_bot::{AppConfig, Application, ConfigOrigin};
use tracing::{info, warn};

/// pilot spot trading bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PILOT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // CLI arg > PILOT_CONFIG env var > default
    let config_path = AppConfig::resolve_path(args.config);
    let (config, origin) = AppConfig::load(&config_path)?;

    pilot_telemetry::init_logging(&config.telemetry.log_level)?;
    info!("Starting pilot v{}", env!("CARGO_PKG_VERSION"));

    match origin {
        ConfigOrigin::File => info!(config_path = %config_path, "Configuration loaded"),
        ConfigOrigin::Defaults => {
            warn!(config_path = %config_path, "Config file not found, using defaults")
        }
    }
    info!(
        mode = ?config.mode,
        pair = %config.pair,
        interval = %config.candle_interval,
        poll_secs = config.poll_interval_secs,
        "Trading configuration"
    );

    let app = Application::new(config)?;
    app.run().await?;

    Ok(())
}
