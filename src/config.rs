//! Runtime tunables, loadable from a TOML file. The wire protocol itself
//! (port, message types, byte layouts) is fixed and lives in
//! [`crate::network`]; only timing and logging knobs belong here.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Seconds between peer-request polls to every connected peer.
    pub peer_request_interval_secs: u64,
    /// Every Nth peer-request also carries an archive-request.
    pub archive_request_every: u32,
    /// Seconds a receiver waits on a read before evicting the peer.
    pub read_timeout_secs: u64,
    /// Milliseconds granted to an outbound connection attempt.
    pub connect_timeout_ms: u64,
    /// Listen backlog for the incoming-peers socket.
    pub listen_backlog: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            peer_request_interval_secs: 5,
            archive_request_every: 12,
            read_timeout_secs: 60,
            connect_timeout_ms: 500,
            listen_backlog: 10,
        }
    }
}

impl NetworkConfig {
    pub fn peer_request_interval(&self) -> Duration {
        Duration::from_secs(self.peer_request_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter, overridable through `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_the_protocol_cadence() {
        let config = Config::default();
        assert_eq!(config.network.peer_request_interval(), Duration::from_secs(5));
        assert_eq!(config.network.archive_request_every, 12);
        assert_eq!(config.network.read_timeout(), Duration::from_secs(60));
        assert_eq!(config.network.connect_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn config_file_roundtrip() -> Result<(), ConfigError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.network.read_timeout_secs = 30;
        config.logging.level = "debug".to_string();
        config.to_file(&path)?;

        let loaded = Config::from_file(&path)?;
        assert_eq!(loaded.network.read_timeout_secs, 30);
        assert_eq!(loaded.logging.level, "debug");
        Ok(())
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let bare: Config = toml::from_str("").unwrap();
        assert_eq!(bare.network.archive_request_every, 12);
        assert_eq!(bare.logging.level, "info");
    }
}
