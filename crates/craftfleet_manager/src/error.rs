use craftfleet_config::ConfigError;
use craftfleet_rcon::RconError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Server not found: {0}")]
    NotFound(String),

    #[error("Conflicting operation: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl ManagerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the caller may safely retry the same request unchanged, as
    /// opposed to errors that require fixing the input or the server state.
    pub fn is_retry_safe(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::ConnectionLost(_)
        )
    }
}

impl From<RconError> for ManagerError {
    fn from(error: RconError) -> Self {
        match error {
            RconError::Io(e) => Self::Connection(e.to_string()),
            RconError::AuthFailed => Self::Auth("RCON password rejected".to_string()),
            RconError::ConnectionLost => Self::ConnectionLost("RCON connection lost".to_string()),
            RconError::Timeout(what) => Self::Timeout(what),
            RconError::Protocol(msg) => Self::Connection(format!("protocol error: {msg}")),
        }
    }
}

impl From<ConfigError> for ManagerError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
