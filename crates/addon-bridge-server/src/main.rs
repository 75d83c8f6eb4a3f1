//! Addon bridge server.
//!
//! Exposes `/query` and `/query/upload` over HTTP and forwards each prompt
//! to the browser addon connected on `/ws`.
//!
//! Run:
//!   cargo run -p addon-bridge-server --bin addon-bridge -- --port 8000

use addon_bridge_server::Cli;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log_filter.parse()?))
        .init();

    tracing::info!("Starting addon bridge on {}:{}", config.host, config.port);

    addon_bridge_server::run(config).await
}
