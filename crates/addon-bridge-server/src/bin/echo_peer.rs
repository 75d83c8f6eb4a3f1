//! Echo peer for manual end-to-end checks.
//!
//! Run:
//!   cargo run -p addon-bridge-server --bin addon-bridge
//!   cargo run -p addon-bridge-server --bin echo-peer -- ws://127.0.0.1:8000/ws
//!
//! Then:
//!   curl -X POST localhost:8000/query -H 'content-type: application/json' -d '{"prompt":"hi"}'

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("addon_bridge=info".parse()?))
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8000/ws".to_string());

    addon_bridge_server::peer::run_echo_peer(&url).await
}
