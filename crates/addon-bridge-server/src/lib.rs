//! HTTP and WebSocket front end for the addon bridge.
//!
//! Callers post prompts over HTTP; the browser addon holds a single
//! WebSocket to `/ws` and answers them. The [`addon_bridge_core::Broker`]
//! in between correlates every reply with the HTTP request waiting on it.

pub mod config;
pub mod peer;
pub mod query;
pub mod redact;
pub mod server;
pub mod transcode;
pub mod ws;

pub use config::{Cli, ConfigError, ServerConfig};
pub use server::{AppState, SharedState, router, run};
