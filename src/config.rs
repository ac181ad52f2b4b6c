use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CLIENT_CONFIG_FILE: &str = "timerush.json";

/// Resolves a path relative to the config directory.
pub fn config_path(sub: &str) -> PathBuf {
    let base = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    Path::new(&base).join(sub)
}

/// Tunables for a client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub connection_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub tick_period_ms: u64,
    /// 0 disables the wake-up heartbeat.
    pub heartbeat_period_ms: u64,
    /// Heartbeat gap, as a multiple of the period, treated as a suspend.
    pub heartbeat_tolerance: f64,
    pub dispatch_log_capacity: usize,
    pub max_connect_attempts: u32,
    pub reconnect_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 2_500,
            ack_timeout_ms: 2_500,
            tick_period_ms: 1_000,
            heartbeat_period_ms: 1_000,
            heartbeat_tolerance: 1.5,
            dispatch_log_capacity: 100,
            max_connect_attempts: 5,
            reconnect_backoff_ms: 500,
        }
    }
}

impl ClientConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn heartbeat_period(&self) -> Option<Duration> {
        (self.heartbeat_period_ms > 0).then(|| Duration::from_millis(self.heartbeat_period_ms))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Settings for the development backend, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub base_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        let port = raw_port.parse().map_err(|_| ConfigError::InvalidVar {
            name: "PORT",
            value: raw_port.clone(),
        })?;
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| format!("http://localhost:{}", port));
        Ok(Self { port, base_url })
    }
}

/// Initialize the config directory with defaults if missing.
pub fn init() -> Result<(), ConfigError> {
    let base = config_path("");
    if !base.exists() {
        fs::create_dir_all(&base)?;
    }

    let client_path = config_path(CLIENT_CONFIG_FILE);
    if !client_path.exists() {
        fs::write(&client_path, serde_json::to_string_pretty(&ClientConfig::default())?)?;
    }
    Ok(())
}

/// Load the client configuration, falling back to defaults for absent keys.
pub fn load_client_config() -> Result<ClientConfig, ConfigError> {
    load_client_config_from(&config_path(CLIENT_CONFIG_FILE))
}

pub fn load_client_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no client config, using defaults");
        return Ok(ClientConfig::default());
    }
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.connection_timeout(), Duration::from_millis(2_500));
        assert_eq!(config.tick_period(), Duration::from_secs(1));
        assert_eq!(config.heartbeat_period(), Some(Duration::from_secs(1)));
        assert_eq!(config.dispatch_log_capacity, 100);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = std::env::temp_dir().join(format!("timerush-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CLIENT_CONFIG_FILE);
        fs::write(&path, r#"{"tickPeriodMs": 250, "heartbeatPeriodMs": 0}"#).unwrap();

        let config = load_client_config_from(&path).unwrap();
        assert_eq!(config.tick_period_ms, 250);
        assert_eq!(config.heartbeat_period(), None);
        assert_eq!(config.ack_timeout_ms, 2_500);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("timerush-missing-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(load_client_config_from(&path).unwrap(), ClientConfig::default());
    }
}
