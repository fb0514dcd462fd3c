pub mod local;
pub mod stub;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use craftfleet_config::LaunchSpec;
use uuid::Uuid;

use crate::console::ConsoleBuffer;
use crate::error::Result;

pub use local::LocalSupervisor;

/// How a game-server process ended. `code` is `None` when the process was
/// killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn clean(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "termination by signal".to_string(),
        }
    }
}

/// Handle to one launched game-server process.
#[async_trait]
pub trait ManagedProcess: Send + Sync + Debug {
    fn is_alive(&self) -> bool;

    /// Resolves once the process has exited. Cancel-safe and may be awaited
    /// repeatedly; the underlying exit notice is recorded exactly once.
    async fn wait(&self) -> ProcessExit;

    /// Writes one line to the process stdin (newline appended if missing).
    async fn send_stdin(&self, line: &str) -> Result<()>;

    /// Forceful termination. Exit is still reported through `wait`.
    async fn kill(&self) -> Result<()>;
}

/// Owns the OS-level lifecycle of game-server processes. Stdout/stderr lines
/// are forwarded to the server's console tagged `stdout`.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn launch(
        &self,
        server_id: Uuid,
        spec: &LaunchSpec,
        console: Arc<ConsoleBuffer>,
    ) -> Result<Arc<dyn ManagedProcess>>;
}
