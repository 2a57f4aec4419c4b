//! # Configuration Management
//!
//! Centralized configuration for the circuit transport.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides with the `MESSAGE_TEMPLATE_` prefix
//!
//! Durations are stored in TOML as milliseconds.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default datagram size budget used when deciding whether to zero-code
pub const DEFAULT_MTU: usize = crate::core::codec::DEFAULT_MTU;

/// Inbound queue capacity between the receiver task and dispatch workers
pub const PACKET_INBOX_SIZE: usize = 100;

/// Recent inbound sequence numbers remembered per circuit for dedup
pub const PACKET_ARCHIVE_SIZE: usize = 200;

/// Outbound sequence numbers wrap back to 1 after this value
pub const SEQUENCE_WRAP: u32 = 0x00FF_FFFF;

const ENV_PREFIX: &str = "MESSAGE_TEMPLATE_";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Socket and worker configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Per-circuit reliability configuration
    #[serde(default)]
    pub circuit: CircuitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_var("BIND_ADDRESS") {
            config.transport.bind_address = addr;
        }
        if let Some(mtu) = env_parse::<usize>("MTU") {
            config.transport.mtu = mtu;
        }
        if let Some(workers) = env_parse::<usize>("DISPATCH_WORKERS") {
            config.transport.dispatch_workers = workers;
        }
        if let Some(capacity) = env_parse::<usize>("INBOUND_QUEUE_CAPACITY") {
            config.transport.inbound_queue_capacity = capacity;
        }
        if let Some(size) = env_parse::<usize>("ARCHIVE_SIZE") {
            config.circuit.archive_size = size;
        }
        if let Some(ms) = env_parse::<u64>("RESEND_TIMEOUT_MS") {
            config.circuit.resend_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("INACTIVITY_TIMEOUT_MS") {
            config.circuit.inactivity_timeout = Duration::from_millis(ms);
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level in environment: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.transport.validate());
        errors.extend(self.circuit.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
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

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

/// Socket, queue and worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// UDP bind address (e.g., "0.0.0.0:9000")
    pub bind_address: String,

    /// Largest datagram the zero-coder may produce
    pub mtu: usize,

    /// Capacity of the queue between the receiver and dispatch workers
    pub inbound_queue_capacity: usize,

    /// Number of dispatch worker tasks
    pub dispatch_workers: usize,

    /// How long a dispatch worker waits on an empty queue before rechecking shutdown
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0:9000"),
            mtu: DEFAULT_MTU,
            inbound_queue_capacity: PACKET_INBOX_SIZE,
            dispatch_workers: 1,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address format: '{}' (expected format: '0.0.0.0:9000')",
                self.bind_address
            ));
        }

        if self.mtu < 64 {
            errors.push(format!("MTU too small: {} (minimum: 64)", self.mtu));
        } else if self.mtu > 65_507 {
            errors.push(format!(
                "MTU too large: {} (maximum UDP payload: 65507)",
                self.mtu
            ));
        }

        if self.inbound_queue_capacity == 0 {
            errors.push("Inbound queue capacity must be greater than 0".to_string());
        }

        if self.dispatch_workers == 0 {
            errors.push("At least one dispatch worker is required".to_string());
        } else if self.dispatch_workers > 256 {
            errors.push(format!(
                "Too many dispatch workers: {} (maximum: 256)",
                self.dispatch_workers
            ));
        }

        if self.poll_interval.as_millis() < 1 {
            errors.push("Poll interval too short (minimum: 1ms)".to_string());
        } else if self.poll_interval.as_secs() > 10 {
            errors.push("Poll interval too long (maximum: 10s)".to_string());
        }

        errors
    }
}

/// Per-circuit reliability settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Recent inbound sequences remembered for duplicate detection
    pub archive_size: usize,

    /// Pending inbound acks that trigger an immediate `PacketAck` flush
    pub max_pending_acks: usize,

    /// Acks are appended to an outbound reliable packet only while fewer
    /// than this many are pending
    pub max_appended_acks: usize,

    /// Period of the maintenance tick (ack flush, resend, inactivity check)
    #[serde(with = "duration_serde")]
    pub ack_flush_interval: Duration,

    /// Age after which an unacked reliable packet is resent
    #[serde(with = "duration_serde")]
    pub resend_timeout: Duration,

    /// Resends attempted before an unacked packet is dropped
    pub max_resend_count: u32,

    /// Silence after which a circuit is closed
    #[serde(with = "duration_serde")]
    pub inactivity_timeout: Duration,

    /// Highest outbound sequence number before wrapping to 1
    pub sequence_wrap: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            archive_size: PACKET_ARCHIVE_SIZE,
            max_pending_acks: 10,
            max_appended_acks: 10,
            ack_flush_interval: Duration::from_millis(500),
            resend_timeout: Duration::from_secs(4),
            max_resend_count: 3,
            inactivity_timeout: Duration::from_secs(60),
            sequence_wrap: SEQUENCE_WRAP,
        }
    }
}

impl CircuitConfig {
    /// Validate circuit configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.archive_size == 0 {
            errors.push("Archive size must be greater than 0".to_string());
        } else if self.archive_size > 100_000 {
            errors.push(format!(
                "Archive size too large: {} (maximum: 100,000)",
                self.archive_size
            ));
        }

        if self.max_pending_acks == 0 {
            errors.push("Max pending acks must be greater than 0".to_string());
        } else if self.max_pending_acks > 255 {
            errors.push(format!(
                "Max pending acks too large: {} (one PacketAck carries at most 255)",
                self.max_pending_acks
            ));
        }

        if self.max_appended_acks > 255 {
            errors.push(format!(
                "Max appended acks too large: {} (the trailer count is one byte)",
                self.max_appended_acks
            ));
        }

        if self.ack_flush_interval.as_millis() < 10 {
            errors.push("Ack flush interval too short (minimum: 10ms)".to_string());
        }

        if self.resend_timeout.as_millis() < 10 {
            errors.push("Resend timeout too short (minimum: 10ms)".to_string());
        } else if self.resend_timeout > self.inactivity_timeout {
            errors.push("Resend timeout cannot exceed the inactivity timeout".to_string());
        }

        if self.inactivity_timeout.as_millis() < 100 {
            errors.push("Inactivity timeout too short (minimum: 100ms)".to_string());
        }

        if self.sequence_wrap == 0 {
            errors.push("Sequence wrap must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level, overridden by `RUST_LOG` when set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether to emit ANSI colors in plain output
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("message-template"),
            log_level: Level::INFO,
            json_format: false,
            color: true,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
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

        if self.json_format && self.color {
            errors.push("Colored output has no effect with JSON formatting".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
