//! # Configuration Management
//!
//! Centralized configuration for the login, realm and bootstrap listeners.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides (`REALM_PROTOCOL_*`)
//!
//! Cipher key derivation reads `CryptoConfig` when each connection is
//! accepted; there is no process-wide key state.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Client build the cipher constants were captured against
pub const DEFAULT_BUILD_NUMBER: u32 = 16042;

/// Magic constant folded into every cipher seed and sent in the greeting
pub const DEFAULT_PROTOCOL_MAGIC: u32 = 0x0979_98A0;

/// Largest frame accepted by the codec (length field, opcode included)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Env variable prefix for overrides
pub const ENV_PREFIX: &str = "REALM_PROTOCOL_";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub crypto: CryptoConfig,

    #[serde(default)]
    pub realm: RealmConfig,

    #[serde(default)]
    pub session: SessionConfig,

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
        config.apply_env(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup. Keys are given without the prefix.
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value.trim().parse::<T>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid value for {ENV_PREFIX}{key}: '{value}'"))
            })
        }

        if let Some(addr) = lookup("STS_ADDRESS") {
            self.server.sts_address = addr;
        }
        if let Some(addr) = lookup("AUTH_ADDRESS") {
            self.server.auth_address = addr;
        }
        if let Some(addr) = lookup("REALM_ADDRESS") {
            self.server.realm_address = addr;
        }
        if let Some(value) = lookup("MAX_CONNECTIONS") {
            self.server.max_connections = parse("MAX_CONNECTIONS", value)?;
        }
        if let Some(value) = lookup("HANDSHAKE_TIMEOUT_MS") {
            self.server.handshake_timeout =
                Duration::from_millis(parse("HANDSHAKE_TIMEOUT_MS", value)?);
        }
        if let Some(value) = lookup("IDLE_TIMEOUT_MS") {
            self.server.idle_timeout = Duration::from_millis(parse("IDLE_TIMEOUT_MS", value)?);
        }
        if let Some(value) = lookup("BUILD_NUMBER") {
            self.crypto.build_number = parse("BUILD_NUMBER", value)?;
        }
        if let Some(value) = lookup("REALM_ID") {
            self.realm.realm_id = parse("REALM_ID", value)?;
        }
        if let Some(value) = lookup("TICKET_TTL_MS") {
            self.session.ticket_ttl = Duration::from_millis(parse("TICKET_TTL_MS", value)?);
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.logging.log_level = value.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level: '{value}'"))
            })?;
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
        errors.extend(self.crypto.validate());
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

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Legacy text bootstrap listener
    pub sts_address: String,

    /// Login listener (plain greeting)
    pub auth_address: String,

    /// Gameplay listener (encrypted from the first frame)
    pub realm_address: String,

    /// Maximum number of concurrent connections across all listeners
    pub max_connections: usize,

    /// How long a connection may stay unauthenticated
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Disconnect after this long without inbound traffic
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Largest accepted frame length
    pub max_frame_size: usize,

    /// Failed logins tolerated on one connection before it is closed
    pub max_failed_logins: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sts_address: String::from("127.0.0.1:6600"),
            auth_address: String::from("127.0.0.1:23115"),
            realm_address: String::from("127.0.0.1:24000"),
            max_connections: 1000,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            idle_timeout: timeout::IDLE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_frame_size: MAX_FRAME_SIZE,
            max_failed_logins: 5,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, address) in [
            ("STS", &self.sts_address),
            ("Auth", &self.auth_address),
            ("Realm", &self.realm_address),
        ] {
            if address.is_empty() {
                errors.push(format!("{name} address cannot be empty"));
            } else if address.parse::<std::net::SocketAddr>().is_err() {
                errors.push(format!(
                    "Invalid {name} address format: '{address}' (expected format: '0.0.0.0:8080')"
                ));
            }
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.idle_timeout.as_millis() < 100 {
            errors.push("Idle timeout too short (minimum: 100ms)".to_string());
        } else if self.idle_timeout.as_secs() > 3600 {
            errors.push("Idle timeout too long (maximum: 1 hour)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: 16 MB)",
                self.max_frame_size
            ));
        }

        if self.max_failed_logins == 0 {
            errors.push("Max failed logins must be greater than 0".to_string());
        }

        errors
    }
}

/// Inputs to cipher key derivation
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CryptoConfig {
    pub build_number: u32,
    pub protocol_magic: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            build_number: DEFAULT_BUILD_NUMBER,
            protocol_magic: DEFAULT_PROTOCOL_MAGIC,
        }
    }
}

impl CryptoConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.build_number == 0 {
            errors.push("Build number cannot be 0".to_string());
        }
        if self.protocol_magic == 0 {
            errors.push("Protocol magic cannot be 0".to_string());
        }
        errors
    }
}

/// Values advertised in the greeting
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RealmConfig {
    pub auth_version: u32,
    pub realm_id: u32,
    pub realm_group_id: u32,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            auth_version: DEFAULT_BUILD_NUMBER,
            realm_id: 1,
            realm_group_id: 21,
        }
    }
}

/// Ticket and replay-protection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of an issued session ticket
    #[serde(with = "duration_serde")]
    pub ticket_ttl: Duration,

    /// How long client public values are remembered
    #[serde(with = "duration_serde")]
    pub replay_window: Duration,

    pub replay_cache_entries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ticket_ttl: Duration::from_secs(60),
            replay_window: Duration::from_secs(300),
            replay_cache_entries: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.ticket_ttl.as_secs() < 1 {
            errors.push("Ticket TTL too short (minimum: 1s)".to_string());
        } else if self.ticket_ttl.as_secs() > 86_400 {
            errors.push("Ticket TTL too long (maximum: 24 hours)".to_string());
        }
        if self.replay_window.as_secs() < 1 {
            errors.push("Replay window too short (minimum: 1s)".to_string());
        }
        if self.replay_cache_entries == 0 {
            errors.push("Replay cache must hold at least one entry".to_string());
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

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("realm-protocol"),
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_valid() {
        assert!(NetworkConfig::default().validate().is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REALM_ADDRESS", "0.0.0.0:24001"),
            ("BUILD_NUMBER", "16101"),
            ("HANDSHAKE_TIMEOUT_MS", "2500"),
            ("LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = NetworkConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.realm_address, "0.0.0.0:24001");
        assert_eq!(config.crypto.build_number, 16101);
        assert_eq!(config.server.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(config.logging.log_level, Level::DEBUG);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = NetworkConfig::default();
        let result = config.apply_env(|key| (key == "MAX_CONNECTIONS").then(|| "lots".to_string()));
        assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
    }

    #[test]
    fn test_example_config_parses_back() {
        let text = NetworkConfig::example_config();
        let parsed = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.crypto, CryptoConfig::default());
        assert_eq!(parsed.server.max_frame_size, MAX_FRAME_SIZE);
    }
}
