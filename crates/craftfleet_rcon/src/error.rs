use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Authentication rejected by server")]
    AuthFailed,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RconError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
