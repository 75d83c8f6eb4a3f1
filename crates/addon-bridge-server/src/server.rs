//! Router assembly and the listening loop.

use crate::config::ServerConfig;
use crate::{query, ws};
use addon_bridge_core::{BridgeStatus, Broker, BrokerConfig};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    response::Html,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// State shared by every handler.
pub struct AppState {
    pub broker: Arc<Broker>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let broker = Arc::new(Broker::new(config.broker_config()));
        Self { broker, config }
    }
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.body_limit();
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(ws::upgrade))
        .route("/query", post(query::send_query))
        .route("/query/upload", post(query::send_query_with_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(config));
    spawn_control_logger(&state.broker);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    tracing::info!("Addon WebSocket endpoint at ws://{}/ws", listener.local_addr()?);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Keep-alive bookkeeping: control frames are only logged.
fn spawn_control_logger(broker: &Broker) {
    let mut control = broker.subscribe_control();
    tokio::spawn(async move {
        loop {
            match control.recv().await {
                Ok(envelope) => tracing::debug!(id = %envelope.id, "addon keep-alive"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "control log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// GET / - liveness page
async fn index() -> Html<&'static str> {
    Html("<h2>Addon bridge is running.</h2>")
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `healthy` while the addon is connected, `degraded` otherwise.
    pub status: &'static str,
    pub addon_connected: bool,
    pub pending_requests: usize,
    /// Wait time of the oldest pending request, absent when idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_ms: Option<u64>,
    pub request_timeout_secs: u64,
}

impl HealthReport {
    pub fn new(status: BridgeStatus, config: &BrokerConfig) -> Self {
        Self {
            status: if status.connected { "healthy" } else { "degraded" },
            addon_connected: status.connected,
            pending_requests: status.pending,
            oldest_pending_ms: status.oldest_pending_ms,
            request_timeout_secs: config.request_timeout.as_secs(),
        }
    }
}

/// GET /health - connectivity probe
async fn health(State(state): State<SharedState>) -> Json<HealthReport> {
    let broker = &state.broker;
    Json(HealthReport::new(broker.status(), broker.config()))
}
