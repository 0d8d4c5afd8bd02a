//! Cash-and-carry bot entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Spot/futures cash-and-carry bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CARRY_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    carry_telemetry::init_logging()?;

    info!("Starting carry bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > CARRY_CONFIG > default
    let config_path = args
        .config
        .or_else(|| std::env::var("CARRY_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = carry_bot::AppConfig::load(&config_path)?;
    info!(
        trade_notional_usd = %config.trading.trade_notional_usd,
        leverage = config.trading.leverage,
        data_dir = %config.persistence.data_dir.display(),
        "Configuration loaded"
    );

    let app = carry_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
