//! Server configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! command-line flags or their environment variables.

use addon_bridge_core::BrokerConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bridge server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds a query waits for the peer's reply.
    pub request_timeout_secs: u64,
    /// Largest accepted image upload, before base64 encoding.
    pub max_upload_bytes: usize,
    /// Default tracing directive, used alongside `RUST_LOG`.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 120,
            max_upload_bytes: 20 * 1024 * 1024,
            log_filter: "addon_bridge=info".to_string(),
        }
    }
}

/// Error loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid listen address {0}")]
    Address(String),
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::Address(addr))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            request_timeout: self.request_timeout(),
            ..BrokerConfig::default()
        }
    }

    /// Request body limit. JSON queries carry the image base64 encoded, so
    /// leave room for the 4/3 expansion plus the surrounding fields.
    pub fn body_limit(&self) -> usize {
        self.max_upload_bytes
            .saturating_mul(4)
            .div_ceil(3)
            .saturating_add(64 * 1024)
    }
}

/// Command-line interface of the bridge server.
#[derive(Parser, Debug, Default)]
#[command(name = "addon-bridge")]
#[command(about = "Bridge HTTP queries to a browser addon over a WebSocket")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "BRIDGE_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "BRIDGE_PORT")]
    pub port: Option<u16>,

    /// Seconds to wait for the addon's reply
    #[arg(long, env = "BRIDGE_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// Largest accepted image upload in bytes
    #[arg(long, env = "BRIDGE_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    /// Merge the config file (if any) with flag overrides.
    pub fn resolve(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout_secs = secs;
        }
        if let Some(bytes) = self.max_upload_bytes {
            config.max_upload_bytes = bytes;
        }
        if self.debug {
            config.log_filter = "addon_bridge=debug".to_string();
        }
        Ok(config)
    }
}
