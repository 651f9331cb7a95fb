//! # Configuration Management
//!
//! Centralized configuration for the connection server.
//!
//! This module provides structured configuration for the server endpoint,
//! session table sizing and timeouts, and logging, plus the pinned wire
//! constants shared by every codec.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides (`NETCODE_SERVER_*`)
//!
//! ## Security Considerations
//! - The server private key must be shared with the token-issuing backend
//!   and nobody else; an all-zero key is rejected by validation
//! - The pending-mapping margin and token history capacity bound the memory
//!   an attacker can pin by flooding connection requests

use crate::core::packet::AllowedPackets;
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::Key;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol version string bound into every packet's associated data
pub const VERSION_INFO: &[u8; 13] = b"NETCODE 1.01\0";

/// Largest datagram the server will read or write
pub const MAX_PACKET_BYTES: usize = 1300;

/// Largest application payload carried by one payload packet
pub const MAX_PAYLOAD_BYTES: usize = 1200;

/// Number of redundant disconnect packets sent when the server drops a client
pub const NUM_DISCONNECT_PACKETS: usize = 10;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "NETCODE_SERVER_";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server endpoint configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session table sizing and timeouts
    #[serde(default)]
    pub session: SessionConfig,

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

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Override fields from `NETCODE_SERVER_*` environment variables.
    ///
    /// Unparseable numeric values are reported as configuration errors.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(addr) = env_var("ADDRESS") {
            self.server.address = addr;
        }

        if let Some(addr) = env_var("PUBLIC_ADDRESS") {
            self.server.public_address = Some(addr);
        }

        if let Some(id) = env_var("PROTOCOL_ID") {
            self.server.protocol_id = parse_u64(&id)?;
        }

        if let Some(key) = env_var("PRIVATE_KEY") {
            self.server.private_key = key_serde::parse_hex(&key)
                .map_err(|e| ProtocolError::ConfigError(format!("{ENV_PREFIX}PRIVATE_KEY: {e}")))?;
        }

        if let Some(max) = env_var("MAX_CLIENTS") {
            self.server.max_clients = parse_env("MAX_CLIENTS", &max)?;
        }

        if let Some(limit) = env_var("BACKPRESSURE_LIMIT") {
            self.server.backpressure_limit = parse_env("BACKPRESSURE_LIMIT", &limit)?;
        }

        if let Some(ms) = env_var("CONNECT_TIMEOUT_MS") {
            self.session.connect_timeout = Duration::from_millis(parse_env("CONNECT_TIMEOUT_MS", &ms)?);
        }

        if let Some(ms) = env_var("CLIENT_TIMEOUT_MS") {
            self.session.client_timeout = Duration::from_millis(parse_env("CLIENT_TIMEOUT_MS", &ms)?);
        }

        if let Some(ms) = env_var("KEEP_ALIVE_INTERVAL_MS") {
            self.session.keep_alive_interval =
                Duration::from_millis(parse_env("KEEP_ALIVE_INTERVAL_MS", &ms)?);
        }

        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        if let Some(json) = env_var("LOG_JSON") {
            self.logging.json_format = parse_env("LOG_JSON", &json)?;
        }

        Ok(())
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
        errors.extend(self.server.validate());
        errors.extend(self.session.validate());
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

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

fn parse_env<T: std::str::FromStr>(suffix: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {ENV_PREFIX}{suffix}: '{value}'")))
}

/// Accepts decimal or `0x`-prefixed hexadecimal.
fn parse_u64(value: &str) -> Result<u64> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|_| ProtocolError::ConfigError(format!("Invalid protocol id: '{value}'")))
}

/// Server endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:40000"). A wildcard bind such as
    /// "0.0.0.0:40000" needs `public_address`.
    pub address: String,

    /// Address clients were told to connect to, checked against the token
    /// whitelist. Defaults to `address`.
    #[serde(default)]
    pub public_address: Option<String>,

    /// Application protocol id bound into every packet
    pub protocol_id: u64,

    /// Key shared with the token-issuing backend (64 hex characters)
    #[serde(with = "key_serde")]
    pub private_key: Key,

    /// Number of client slots
    pub max_clients: usize,

    /// Packet types the server will decode
    pub allowed_packets: AllowedPackets,

    /// Drop every connection request unconditionally
    #[serde(default)]
    pub ignore_requests: bool,

    /// Drop every connection response unconditionally
    #[serde(default)]
    pub ignore_responses: bool,

    /// Period of the update tick
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Maximum number of datagrams queued between the socket and the engine
    pub backpressure_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:40000"),
            public_address: None,
            protocol_id: 0x1122_3344_5566_7788,
            private_key: Key::from_bytes([0u8; 32]),
            max_clients: 64,
            allowed_packets: AllowedPackets::server_default(),
            ignore_requests: false,
            ignore_responses: false,
            tick_interval: Duration::from_millis(16),
            backpressure_limit: 1024,
        }
    }
}

impl ServerConfig {
    /// Parsed bind address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.address.parse::<SocketAddr>().map_err(|e| {
            ProtocolError::ConfigError(format!("Invalid server address '{}': {e}", self.address))
        })
    }

    /// Parsed public address, falling back to the bind address
    pub fn public_addr(&self) -> Result<SocketAddr> {
        match &self.public_address {
            Some(addr) => addr.parse::<SocketAddr>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid public address '{addr}': {e}"))
            }),
            None => self.bind_addr(),
        }
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Validate address format
        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:40000')",
                self.address
            ));
        }

        if let Some(ref public) = self.public_address {
            if public.parse::<SocketAddr>().is_err() {
                errors.push(format!("Invalid public address format: '{public}'"));
            }
        } else if let Ok(bind) = self.bind_addr() {
            if bind.ip().is_unspecified() {
                errors.push(format!(
                    "WARNING: wildcard bind address '{bind}' without a public address - \
                     no connect token can whitelist it"
                ));
            }
        }

        if self.private_key.is_zero() {
            errors.push("Server private key is not set".to_string());
        }

        if self.max_clients == 0 {
            errors.push("Max clients must be greater than 0".to_string());
        } else if self.max_clients > u32::MAX as usize {
            errors.push(format!("Max clients too large: {}", self.max_clients));
        }

        if !self.allowed_packets.contains(AllowedPackets::REQUEST)
            || !self.allowed_packets.contains(AllowedPackets::RESPONSE)
        {
            errors.push(
                "WARNING: requests or responses are not allowed - no client can connect"
                    .to_string(),
            );
        }

        if self.tick_interval.is_zero() {
            errors.push("Tick interval must be greater than 0".to_string());
        } else if self.tick_interval.as_secs() >= 1 {
            errors.push("Tick interval too long (maximum: 1s)".to_string());
        }

        // Validate backpressure limit
        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        errors
    }
}

/// Session table sizing and timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Extra pending-mapping capacity beyond `max_clients`
    pub pending_margin: usize,

    /// Maximum number of live token fingerprints remembered
    pub token_history_capacity: usize,

    /// Lifetime of a pending mapping that has not completed the handshake
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Silence after which a connected client is dropped
    #[serde(with = "duration_serde")]
    pub client_timeout: Duration,

    /// Idle time after which the server sends a keep-alive
    #[serde(with = "duration_serde")]
    pub keep_alive_interval: Duration,

    /// Inbound payload packets buffered per client
    pub payload_queue_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_margin: 256,
            token_history_capacity: 1024,
            connect_timeout: Duration::from_secs(5),
            client_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_millis(100),
            payload_queue_limit: 256,
        }
    }
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.token_history_capacity == 0 {
            errors.push("Token history capacity must be greater than 0".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.client_timeout.as_millis() < 100 {
            errors.push("Client timeout too short (minimum: 100ms)".to_string());
        } else if self.client_timeout.as_secs() > 3600 {
            errors.push("Client timeout too long (maximum: 1 hour)".to_string());
        }

        if self.keep_alive_interval.is_zero() {
            errors.push("Keep-alive interval must be greater than 0".to_string());
        } else if self.keep_alive_interval >= self.client_timeout {
            errors.push("Keep-alive interval must be shorter than the client timeout".to_string());
        }

        if self.payload_queue_limit == 0 {
            errors.push("Payload queue limit must be greater than 0".to_string());
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

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("netcode-server"),
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

/// Helper module for hex-encoded key serialization/deserialization
mod key_serde {
    use crate::utils::crypto::{Key, KEY_BYTES};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(key: &Key, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(key.as_bytes()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Key, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        parse_hex(&hex).map_err(serde::de::Error::custom)
    }

    pub fn parse_hex(hex: &str) -> Result<Key, String> {
        let hex = hex.trim();
        if hex.len() != KEY_BYTES * 2 {
            return Err(format!(
                "key must be {} hex characters, got {}",
                KEY_BYTES * 2,
                hex.len()
            ));
        }
        let mut bytes = [0u8; KEY_BYTES];
        hex::decode_to_slice(hex, &mut bytes).map_err(|e| format!("key is not valid hex: {e}"))?;
        Ok(Key::from_bytes(bytes))
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_private_key_hex_roundtrip() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.server.private_key = Key::from_bytes([0xAB; 32]);
        });
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains(&"ab".repeat(32)));

        let parsed = NetworkConfig::from_toml(&toml).unwrap();
        assert_eq!(parsed.server.private_key, Key::from_bytes([0xAB; 32]));
        assert_eq!(parsed.session.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_protocol_id() {
        assert_eq!(parse_u64("0x10").unwrap(), 16);
        assert_eq!(parse_u64("42").unwrap(), 42);
        assert!(parse_u64("0xZZ").is_err());
    }

    #[test]
    fn test_bad_key_hex_rejected() {
        assert!(key_serde::parse_hex("abcd").is_err());
        assert!(key_serde::parse_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_signed_key_hex_rejected() {
        assert!(key_serde::parse_hex(&"+a".repeat(32)).is_err());

        let config = NetworkConfig::default_with_overrides(|c| {
            c.server.private_key = Key::from_bytes([0x0A; 32]);
        });
        let valid = toml::to_string_pretty(&config).unwrap();
        assert!(NetworkConfig::from_toml(&valid).is_ok());
        let signed = valid.replace(&"0a".repeat(32), &"+a".repeat(32));
        assert!(NetworkConfig::from_toml(&signed).is_err());
    }

    #[test]
    fn test_wildcard_bind_needs_public_address() {
        let mut server = ServerConfig {
            address: "0.0.0.0:40000".to_string(),
            private_key: Key::from_bytes([1; 32]),
            ..ServerConfig::default()
        };
        assert!(server.validate().iter().any(|e| e.contains("wildcard bind address")));

        server.address = "[::]:40000".to_string();
        assert!(server.validate().iter().any(|e| e.contains("wildcard bind address")));

        server.public_address = Some("203.0.113.7:40000".to_string());
        assert!(server.validate().is_empty());
    }

    #[test]
    fn test_public_addr_falls_back_to_bind() {
        let mut server = ServerConfig::default();
        assert_eq!(server.public_addr().unwrap(), server.bind_addr().unwrap());
        server.public_address = Some("10.0.0.1:40000".to_string());
        assert_eq!(server.public_addr().unwrap(), "10.0.0.1:40000".parse().unwrap());
    }
}
