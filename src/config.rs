//! # Configuration Management
//!
//! Centralized configuration for the protocol client.
//!
//! This module provides structured configuration for a session: account
//! credentials and product identity, transport parameters and timing, and
//! logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Product tags whose logon requires a second (expansion) key proof.
pub const EXPANSION_PRODUCTS: [&str; 2] = ["D2XP", "W3XP"];

/// Product tags that request ladder-map info instead of a friends list
/// after entering chat.
pub const WAR_PRODUCTS: [&str; 2] = ["WAR3", "W3XP"];

/// Which logon sub-protocol to drive once the auth check passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogonMethod {
    /// Single request/response with a plaintext-equivalent status code.
    Legacy,
    /// Multi-round SRP-like exchange.
    #[default]
    Srp,
}

/// Proof inputs for one product key. Retail-key string parsing is the
/// caller's concern; the proof only needs these three fields.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProductKey {
    pub product_value: u32,
    pub public_value: u32,
    pub private_value: Vec<u8>,
}

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ChatwireConfig {
    /// Account and product identity
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChatwireConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
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

        if let Ok(addr) = std::env::var("CHATWIRE_SERVER_ADDRESS") {
            config.transport.address = addr;
        }

        if let Ok(username) = std::env::var("CHATWIRE_USERNAME") {
            config.client.username = username;
        }

        if let Ok(password) = std::env::var("CHATWIRE_PASSWORD") {
            config.client.password = password;
        }

        if let Ok(timeout) = std::env::var("CHATWIRE_RESPONSE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.transport.response_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(interval) = std::env::var("CHATWIRE_KEEPALIVE_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.transport.keepalive_interval = Duration::from_millis(val);
            }
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

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
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

/// Account credentials and product identity
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Account name
    pub username: String,

    /// Account password (never transmitted; only its digests are)
    pub password: String,

    /// 4-character product tag (byte-reversed on the wire)
    pub product: String,

    /// 4-character platform tag
    pub platform: String,

    /// Protocol version byte for this product
    pub version_byte: u8,

    /// Executable version reported in the auth check
    pub exe_version: u32,

    /// Executable information string reported in the auth check
    pub exe_info: String,

    /// Key owner name reported in the auth check
    pub key_owner: String,

    /// Key proof inputs; expansion products require two entries
    pub keys: Vec<ProductKey>,

    /// Local game files hashed by the standard revision check
    pub game_files: Vec<PathBuf>,

    /// Which logon sub-protocol to use
    pub logon_method: LogonMethod,

    /// Treat a server logon-proof mismatch as fatal instead of a warning
    pub strict_server_proof: bool,

    /// Hold a ping reply that arrives before auth info and flush it after
    pub defer_ping_reply: bool,

    /// Windows locale identifier
    pub locale_id: u32,

    /// Language tag, e.g. "enUS"
    pub language: String,

    /// Country name
    pub country: String,

    /// Country abbreviation
    pub country_abbrev: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            product: String::from("W2BN"),
            platform: String::from("IX86"),
            version_byte: 0x4F,
            exe_version: 0,
            exe_info: String::new(),
            key_owner: String::new(),
            keys: Vec::new(),
            game_files: Vec::new(),
            logon_method: LogonMethod::default(),
            strict_server_proof: false,
            defer_ping_reply: false,
            locale_id: 1033,
            language: String::from("enUS"),
            country: String::from("United States"),
            country_abbrev: String::from("USA"),
        }
    }
}

impl ClientConfig {
    /// Whether the configured product needs an expansion key proof.
    pub fn is_expansion_product(&self) -> bool {
        EXPANSION_PRODUCTS.contains(&self.product.as_str())
    }

    /// Whether the configured product requests ladder-map info after
    /// entering chat (others request a friends list).
    pub fn is_war_product(&self) -> bool {
        WAR_PRODUCTS.contains(&self.product.as_str())
    }

    /// Key proofs the auth check must carry for this product.
    pub fn required_key_count(&self) -> usize {
        if self.is_expansion_product() {
            2
        } else {
            1
        }
    }

    /// Validate credentials and product identity
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.username.is_empty() {
            errors.push("Username cannot be empty".to_string());
        }

        if self.product.len() != 4 || !self.product.is_ascii() {
            errors.push(format!(
                "Product tag must be 4 ASCII characters, got '{}'",
                self.product
            ));
        }

        if self.platform.len() != 4 || !self.platform.is_ascii() {
            errors.push(format!(
                "Platform tag must be 4 ASCII characters, got '{}'",
                self.platform
            ));
        }

        if self.language.len() != 4 || !self.language.is_ascii() {
            errors.push(format!(
                "Language tag must be 4 ASCII characters, got '{}'",
                self.language
            ));
        }

        if self.keys.len() < self.required_key_count() {
            errors.push(format!(
                "Product '{}' requires {} key(s), {} configured",
                self.product,
                self.required_key_count(),
                self.keys.len()
            ));
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Server address (e.g., "uswest.example.net:6112")
    pub address: String,

    /// Timeout for the initial TCP connect
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Socket read timeout while a response is pending
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Interval for keep-alive frames once in chat
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// Interval for advertisement-update checks once in chat
    #[serde(with = "duration_serde")]
    pub ad_check_interval: Duration,

    /// Pre-allocated buffers in each of the inbound and outbound pools
    pub pool_size: usize,

    /// Capacity of one pooled buffer; larger frames fall back to one-off
    /// allocations
    pub buffer_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:6112"),
            connect_timeout: timeout::CONNECT_TIMEOUT,
            response_timeout: timeout::RESPONSE_TIMEOUT,
            keepalive_interval: timeout::KEEPALIVE_INTERVAL,
            ad_check_interval: timeout::AD_CHECK_INTERVAL,
            pool_size: crate::utils::buffer_pool::DEFAULT_POOL_SIZE,
            buffer_capacity: crate::utils::buffer_pool::DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err()
            && !self.address.contains(':')
        {
            errors.push(format!(
                "Invalid server address format: '{}' (expected 'host:port')",
                self.address
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        }

        if self.response_timeout.as_millis() < 100 {
            errors.push("Response timeout too short (minimum: 100ms)".to_string());
        }

        if self.keepalive_interval.as_millis() < 100 {
            errors.push("Keep-alive interval too short (minimum: 100ms)".to_string());
        } else if self.keepalive_interval.as_secs() > 3600 {
            errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
        }

        if self.pool_size == 0 {
            errors.push("Pool size must be greater than 0".to_string());
        }

        if self.buffer_capacity < crate::core::frame::HEADER_LEN {
            errors.push("Buffer capacity smaller than a frame header".to_string());
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

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("chatwire"),
            log_level: Level::INFO,
            json_format: false,
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
