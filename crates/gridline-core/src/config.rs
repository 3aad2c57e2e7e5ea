//! Configuration for gridline
//!
//! Window projection defaults, server wiring, and client connection settings.
//! Every section has defaults, so a config file only needs the keys it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::projector::FixedSize;

/// System-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridlineConfig {
    /// Window projection parameters
    pub projector: ProjectorConfig,
    /// Server process settings
    pub server: ServerConfig,
    /// Client session settings
    pub client: ClientConfig,
}

/// Window projection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Row height used until a row is measured, in pixels
    pub estimated_row_height: f64,
    /// Extra rows materialized beyond each edge of the visible range
    pub overscan: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            estimated_row_height: 32.0,
            overscan: 20,
        }
    }
}

impl ProjectorConfig {
    pub fn estimator(&self) -> FixedSize {
        FixedSize(self.estimated_row_height)
    }
}

/// Server process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// SQLite database file; the server uses an in-memory store when unset
    pub database_path: Option<String>,
    /// Identifier of this process on the relay
    pub process_id: String,
    /// Changes buffered per connected client before it is told to resync
    pub subscriber_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4000".to_string(),
            database_path: None,
            process_id: "gridline-1".to_string(),
            subscriber_buffer: 1024,
        }
    }
}

/// Client session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the server, e.g. `http://127.0.0.1:4000`
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Delay before reopening a dropped push connection
    pub reconnect_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000".to_string(),
            request_timeout_secs: 10,
            reconnect_delay_ms: 1000,
        }
    }
}

impl GridlineConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Read and validate a config file. `.json` files are parsed as JSON,
    /// anything else as TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            Self::from_toml(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let height = self.projector.estimated_row_height;
        if !height.is_finite() || height <= 0.0 {
            return Err(ConfigError::OutOfRange(
                "estimated_row_height must be a positive number".to_string(),
            ));
        }

        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "listen_addr is not a socket address: {}",
                self.server.listen_addr
            )));
        }
        if self.server.process_id.trim().is_empty() {
            return Err(ConfigError::MissingField("process_id".to_string()));
        }
        if self.server.subscriber_buffer == 0 {
            return Err(ConfigError::OutOfRange(
                "subscriber_buffer must be positive".to_string(),
            ));
        }

        if !(self.client.base_url.starts_with("http://")
            || self.client.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "base_url must be an http(s) URL: {}",
                self.client.base_url
            )));
        }
        if self.client.request_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Value is malformed
    Invalid(String),
    /// Value is out of valid range
    OutOfRange(String),
    /// Required field is missing
    MissingField(String),
    /// Config file could not be read
    Io(String),
    /// Config file could not be parsed
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid(msg) => write!(f, "Invalid value: {}", msg),
            ConfigError::OutOfRange(msg) => write!(f, "Value out of range: {}", msg),
            ConfigError::MissingField(msg) => write!(f, "Missing field: {}", msg),
            ConfigError::Io(msg) => write!(f, "Cannot read config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Cannot parse config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GridlineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.projector.estimator(), FixedSize(32.0));
        assert_eq!(config.projector.overscan, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = GridlineConfig::from_toml(
            r#"
            [server]
            listen_addr = "0.0.0.0:8080"
            process_id = "b"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.server.subscriber_buffer, 1024);
        assert_eq!(config.projector, ProjectorConfig::default());
    }

    #[test]
    fn test_toml_and_json_serialization() {
        let mut config = GridlineConfig::default();
        config.server.database_path = Some("/tmp/rows.db".into());

        let toml = config.to_toml().unwrap();
        assert_eq!(GridlineConfig::from_toml(&toml).unwrap(), config);
        let json = config.to_json().unwrap();
        assert_eq!(GridlineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_out_of_range() {
        let mut config = GridlineConfig::default();
        config.projector.estimated_row_height = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));

        let mut config = GridlineConfig::default();
        config.server.subscriber_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_addresses() {
        let mut config = GridlineConfig::default();
        config.server.listen_addr = "localhost".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = GridlineConfig::default();
        config.client.base_url = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridline.toml");
        std::fs::write(&path, "[projector]\noverscan = 5\n").unwrap();
        assert_eq!(GridlineConfig::load(&path).unwrap().projector.overscan, 5);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(GridlineConfig::load(&missing), Err(ConfigError::Io(_))));

        std::fs::write(&path, "[projector]\noverscan = \"many\"\n").unwrap();
        assert!(matches!(GridlineConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
