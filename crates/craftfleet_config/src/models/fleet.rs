use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::server::ServerConfig;

/// Settings for the RCON channel shared by every server in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RconSettings {
    /// Timeout for a single TCP connect + auth handshake.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Delay between connect attempts while a server is starting.
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
    /// Timeout for one command round-trip.
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for RconSettings {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            retry_interval: default_retry_interval(),
            command_timeout: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Address the HTTP API listens on.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Host new servers are bound to.
    #[serde(default = "default_host")]
    pub host: String,
    /// First game port handed out; RCON ports live at +10000.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Ring-buffer capacity of each server console.
    #[serde(default = "default_console_capacity")]
    pub console_capacity: usize,
    #[serde(with = "humantime_serde", default = "default_startup_timeout")]
    pub startup_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_stop_timeout")]
    pub stop_timeout: Duration,
    #[serde(default)]
    pub rcon: RconSettings,
    /// Servers created at boot, before the API is reachable.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_base_port() -> u16 {
    25565
}

fn default_console_capacity() -> usize {
    1000
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            host: default_host(),
            base_port: default_base_port(),
            console_capacity: default_console_capacity(),
            startup_timeout: default_startup_timeout(),
            stop_timeout: default_stop_timeout(),
            rcon: RconSettings::default(),
            servers: Vec::new(),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: FleetConfig = serde_yml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.console_capacity == 0 {
            return Err(ConfigError::invalid("console_capacity must be at least 1"));
        }
        if self.startup_timeout.is_zero() {
            return Err(ConfigError::invalid("startup_timeout must be non-zero"));
        }
        for server in &self.servers {
            server.validate()?;
        }
        Ok(())
    }
}
