use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    #[default]
    Java,
    Bedrock,
}

impl Edition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Edition::Java => "java",
            Edition::Bedrock => "bedrock",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Survival,
    Creative,
    Adventure,
    Spectator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Peaceful,
    Easy,
    #[default]
    Normal,
    Hard,
}

/// How to spawn the game-server process for one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// The executable to run
    pub executable: String,
    /// Arguments to pass to the executable
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the server
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(default)]
    pub edition: Edition,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub rcon_port: u16,
    pub rcon_password: String,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default)]
    pub motd: Option<String>,
    #[serde(default)]
    pub game_mode: GameMode,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Client versions this server accepts; empty means "same as `version`".
    #[serde(default)]
    pub allowed_versions: Vec<String>,
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    #[serde(default)]
    pub launch: Option<LaunchSpec>,
}

fn default_version() -> String {
    "1.20.1".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_players() -> u32 {
    20
}

fn default_stop_command() -> String {
    "stop".to_string()
}

impl ServerConfig {
    /// A fresh config with stock defaults. The RCON port sits one fixed
    /// offset above the game port so both can be derived from one allocation,
    /// saturating at the top of the port range; `validate` rejects the
    /// collision that saturation can produce.
    pub fn new(name: impl Into<String>, edition: Edition, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            edition,
            version: default_version(),
            host: host.into(),
            port,
            rcon_port: port.saturating_add(10_000),
            rcon_password: String::new(),
            max_players: default_max_players(),
            motd: None,
            game_mode: GameMode::default(),
            difficulty: Difficulty::default(),
            allowed_versions: Vec::new(),
            stop_command: default_stop_command(),
            launch: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("server name must not be empty"));
        }
        if self.name.len() > 64 {
            return Err(ConfigError::invalid("server name exceeds 64 characters"));
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::invalid("server version must not be empty"));
        }
        if self.max_players == 0 || self.max_players > 1000 {
            return Err(ConfigError::invalid(
                "max_players must be between 1 and 1000",
            ));
        }
        if self.port == self.rcon_port {
            return Err(ConfigError::invalid(
                "game port and RCON port must not collide",
            ));
        }
        if self.rcon_password.is_empty() {
            return Err(ConfigError::invalid("rcon_password must not be empty"));
        }
        Ok(())
    }

    /// Address the RCON client dials.
    pub fn rcon_addr(&self) -> String {
        format!("{}:{}", self.host, self.rcon_port)
    }

    /// Public game address shown to players.
    pub fn game_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn motd_or_default(&self) -> String {
        match &self.motd {
            Some(motd) if !motd.is_empty() => motd.clone(),
            _ => format!("Welcome to {}!", self.name),
        }
    }

    /// The launch spec to hand to the process supervisor, falling back to the
    /// stock invocation for the server's edition.
    pub fn launch_spec(&self) -> LaunchSpec {
        if let Some(spec) = &self.launch {
            return spec.clone();
        }
        match self.edition {
            Edition::Java => LaunchSpec {
                executable: "java".to_string(),
                args: vec![
                    "-Xmx2G".to_string(),
                    "-jar".to_string(),
                    "server.jar".to_string(),
                    "--nogui".to_string(),
                    "--port".to_string(),
                    self.port.to_string(),
                ],
                working_dir: None,
            },
            Edition::Bedrock => LaunchSpec {
                executable: "./bedrock_server".to_string(),
                args: Vec::new(),
                working_dir: None,
            },
        }
    }
}
