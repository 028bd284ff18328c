//! Margin funding lending bot - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Margin funding lending bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via LEND_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    lend_telemetry::init_logging()?;

    info!("Starting lend-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > LEND_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("LEND_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = lend_bot::AppConfig::from_file(&config_path)?;
    info!(
        currency = %config.engine.currency,
        paper = config.paper.enabled,
        market_data = %config.exchange.base_url,
        "Configuration loaded"
    );

    let app = lend_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
