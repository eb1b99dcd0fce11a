//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file named by `HUDDLE_CONFIG`
//! - `huddle.toml`, `/etc/huddle/huddle.toml`, or `~/.config/huddle/huddle.toml`
//! - Environment variables (`HUDDLE_HOST`, `HUDDLE_PORT`) for defaults

use anyhow::{Context, Result};
use huddle_core::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Chat behaviour.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of registered names.
    #[serde(default = "default_max_members")]
    pub max_members: usize,

    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Frames buffered per connection before pushes start to stall.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Chat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Upper bound on a single push, in milliseconds.
    #[serde(default = "default_push_timeout")]
    pub push_timeout_ms: u64,

    /// Sender name for join/leave/rename announcements.
    #[serde(default = "default_system_sender")]
    pub system_sender: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    std::env::var("HUDDLE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HUDDLE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_members() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_queue() -> usize {
    256
}

fn default_push_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_system_sender() -> String {
    "SERVER".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            chat: ChatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_members: default_max_members(),
            max_message_size: default_max_message_size(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            push_timeout_ms: default_push_timeout(),
            system_sender: default_system_sender(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("HUDDLE_CONFIG") {
            return Self::from_file(path);
        }

        let config_paths = [
            "huddle.toml",
            "/etc/huddle/huddle.toml",
            "~/.config/huddle/huddle.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Coordinator settings derived from this configuration.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            push_timeout: Duration::from_millis(self.chat.push_timeout_ms),
            max_members: self.limits.max_members,
            system_sender: self.chat.system_sender.clone(),
        }
    }
}
