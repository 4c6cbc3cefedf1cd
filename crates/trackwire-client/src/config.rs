//! Client configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (explicit path, or the first of the default paths)
//! - Environment variables (`TRACKWIRE__*`, `__` separates nested keys)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use trackwire_protocol::{Codec, JsonCodec, MsgpackCodec};
use trackwire_transport::WebSocketConfig;

const ENV_PREFIX: &str = "TRACKWIRE";
const ENV_SEPARATOR: &str = "__";

const CONFIG_PATHS: [&str; 3] = [
    "trackwire.toml",
    "/etc/trackwire/trackwire.toml",
    "~/.config/trackwire/trackwire.toml",
];

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server address (`http`, `https`, `ws` or `wss`).
    #[serde(default = "default_address")]
    pub address: String,

    /// Path to connect to, relative to the address.
    #[serde(default = "default_path")]
    pub path: String,

    /// Delay before reconnecting after a retryable close, in milliseconds.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,

    /// Wire codec.
    #[serde(default)]
    pub codec: CodecKind,

    /// WebSocket configuration.
    #[serde(default)]
    pub websocket: WebSocketSection,

    /// Trackers to open on startup.
    #[serde(default)]
    pub trackers: Vec<TrackerConfig>,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Wire codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Msgpack,
    Json,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketSection {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// A tracker opened on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tracker id.
    pub id: String,

    /// Parameters sent with the open handshake.
    #[serde(default = "default_params")]
    pub params: Value,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_address() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_path() -> String {
    "/live".to_string()
}

fn default_retry_interval() -> u64 {
    2_500
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_params() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            path: default_path(),
            retry_interval_ms: default_retry_interval(),
            codec: CodecKind::default(),
            websocket: WebSocketSection::default(),
            trackers: Vec::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (or the first default path that
    /// exists), with environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(path: Option<&Path>, env: Option<::config::Map<String, String>>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let mut builder = ::config::Config::builder();
        if let Some(path) = &path {
            tracing::debug!(path = %path.display(), "Loading config file");
            builder = builder.add_source(
                ::config::File::from(path.as_path()).format(::config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Reconnect delay.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// WebSocket connector configuration.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: self.websocket.max_message_size,
            connect_timeout: Duration::from_millis(self.websocket.connect_timeout_ms),
            ..WebSocketConfig::default()
        }
    }

    /// The configured codec.
    #[must_use]
    pub fn codec(&self) -> Arc<dyn Codec> {
        match self.codec {
            CodecKind::Msgpack => Arc::new(MsgpackCodec::new()),
            CodecKind::Json => Arc::new(JsonCodec::new()),
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}
