//! # Configuration Management
//!
//! Centralized configuration for the rendezvous protocol library.
//!
//! This module provides structured configuration for the relay server and
//! clients, including bind/connect addresses, handshake deadlines, transport
//! limits, and logging options. Protocol-wide constants (key sizes, the
//! confirmation sentinel, the reserved server identity) live here too so the
//! rest of the crate has a single place to reference them.
//!
//! ## Configuration Sources
//! - TOML, from a file or a string
//! - `Default` plus targeted overrides
//! - `RENDEZVOUS_*` environment variables

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// RSA modulus size for identity keypairs
pub const RSA_KEY_BITS: usize = 2048;

/// AES key length in bytes (AES-256)
pub const AES_KEY_LEN: usize = 32;

/// AES-OFB initialization vector length in bytes
pub const AES_IV_LEN: usize = 16;

/// Plaintext the confirmation stage must decrypt to, byte for byte
pub const HANDSHAKE_SENTINEL: &str = "Connection Established!";

/// Identity the relay server answers to. No escaping mechanism exists for
/// it: a peer literally named `server` cannot be addressed directly.
pub const RESERVED_SERVER_IDENTITY: &str = "server";

/// Default rendezvous port
pub const DEFAULT_PORT: u16 = 1887;

/// Max allowed length of a single wire record (64 KiB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Top-level settings for every piece of the crate. Each section has
/// usable defaults, so partial TOML documents are fine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RendezvousConfig {
    /// Relay server section
    #[serde(default)]
    pub server: ServerConfig,

    /// Client section
    #[serde(default)]
    pub client: ClientConfig,

    /// Wire transport section
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging section
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RendezvousConfig {
    /// Read and parse a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with `RENDEZVOUS_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RENDEZVOUS_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(addr) = std::env::var("RENDEZVOUS_CLIENT_ADDRESS") {
            config.client.server_address = addr;
        }

        if let Ok(timeout) = std::env::var("RENDEZVOUS_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.handshake_timeout = Duration::from_millis(val);
                config.client.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(len) = std::env::var("RENDEZVOUS_MAX_LINE_LENGTH") {
            if let Ok(val) = len.parse::<usize>() {
                config.transport.max_line_length = val;
            }
        }

        Ok(config)
    }

    /// Defaults with the given mutations applied. Handy for tests and
    /// demos that change one or two fields.
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// TOML text for the default configuration, usable as a starting file.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Serialize this configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))
    }

    /// Collect every validation complaint across all sections. An empty
    /// list means the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// [`validate`](Self::validate) folded into a `Result` for call sites
    /// that refuse to start on any complaint.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Relay server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:1887")
    pub address: String,

    /// Maximum number of concurrent client connections
    pub max_connections: usize,

    /// How long a handshake may sit in a non-terminal stage before its
    /// session is evicted and the connection closed
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Interval between eviction sweeps over pending handshakes
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            max_connections: 1000,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            sweep_interval: timeout::SWEEP_INTERVAL,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:1887')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.handshake_timeout.as_secs() < 1 {
            errors.push("Handshake timeout too short (minimum: 1s)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.sweep_interval.as_millis() < 100 {
            errors.push("Sweep interval too short (minimum: 100ms)".to_string());
        } else if self.sweep_interval > self.handshake_timeout {
            errors.push("Sweep interval should not exceed the handshake timeout".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Rendezvous server address to connect to
    pub server_address: String,

    /// Timeout for the TCP connection attempt
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// How long to wait for a handshake to reach the established state
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout: timeout::CONNECT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_address.is_empty() {
            errors.push("Client server address cannot be empty".to_string());
        } else if self.server_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client server address format: '{}' (expected format: 'host:1887')",
                self.server_address
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        }

        if self.handshake_timeout.as_secs() < 1 {
            errors.push("Handshake timeout too short (minimum: 1s)".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Maximum allowed length of one wire record in bytes
    pub max_line_length: usize,

    /// Capacity of each connection's outbound record queue
    pub send_queue_depth: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_line_length: MAX_LINE_LENGTH,
            send_queue_depth: 32,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // A stage-2 record carries two RSA blocks and a DER key in base64,
        // so anything below a few KiB cannot fit a real handshake.
        if self.max_line_length < 4096 {
            errors.push("Max line length too small (minimum: 4096 bytes)".to_string());
        } else if self.max_line_length > 16 * 1024 * 1024 {
            errors.push(format!(
                "Max line length too large: {} bytes (maximum recommended: 16 MB)",
                self.max_line_length
            ));
        }

        if self.send_queue_depth == 0 {
            errors.push("Send queue depth must be greater than 0".to_string());
        } else if self.send_queue_depth > 100_000 {
            errors.push(format!(
                "Send queue depth too large: {} (max recommended: 100,000)",
                self.send_queue_depth
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("rendezvous-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                // Check if parent directory exists (if path is absolute)
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Durations as integer milliseconds in TOML.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `tracing::Level` as its lowercase name in TOML.
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let name = String::deserialize(deserializer)?;
        Level::from_str(&name)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {name}")))
    }
}
