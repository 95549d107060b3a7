use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::BAUD_RATE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Bridge settings; every field has a default so partial files are fine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub listen_port: u16,
    pub server_name: String,
    pub baud_rate: u32,
    pub scan_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub event_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            listen_port: 12345,
            server_name: "Test Server".to_string(),
            baud_rate: BAUD_RATE,
            scan_interval_ms: 3000,
            probe_timeout_ms: 5000,
            heartbeat_interval_ms: 30000,
            event_capacity: 64,
        }
    }
}

impl BridgeSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse { path: display, source })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let must_be_positive = [
            ("baud_rate", self.baud_rate as u64),
            ("scan_interval_ms", self.scan_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("event_capacity", self.event_capacity as u64),
        ];
        for (field, value) in must_be_positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.server_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server_name",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.listen_port))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
