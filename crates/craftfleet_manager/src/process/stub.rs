use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use craftfleet_config::LaunchSpec;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::console::{ConsoleBuffer, LineSource};
use crate::error::{ManagerError, Result};
use crate::process::{ManagedProcess, ProcessExit, ProcessSupervisor};

/// In-memory process supervisor for tests and simulation mode: no OS process
/// is spawned, but lifecycle semantics (launch failure, stdin `stop`, kill,
/// unexpected exit) behave like the real thing.
#[derive(Default)]
pub struct StubSupervisor {
    fail_next_launch: AtomicBool,
    startup_lines: Vec<String>,
    processes: DashMap<Uuid, Arc<StubProcess>>,
}

impl StubSupervisor {
    pub fn new() -> Self {
        Self {
            fail_next_launch: AtomicBool::new(false),
            startup_lines: vec!["Starting minecraft server".to_string()],
            processes: DashMap::new(),
        }
    }

    pub fn with_startup_lines(mut self, lines: Vec<String>) -> Self {
        self.startup_lines = lines;
        self
    }

    /// The next `launch` call fails with a `Launch` error.
    pub fn fail_next_launch(&self) {
        self.fail_next_launch.store(true, Ordering::SeqCst);
    }

    /// Simulates an unexpected process death. Returns false when no live
    /// process exists for the server.
    pub fn crash(&self, server_id: Uuid) -> bool {
        match self.processes.get(&server_id) {
            Some(process) if process.is_alive() => {
                process.finish(ProcessExit { code: Some(1) });
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self, server_id: Uuid) -> bool {
        self.processes
            .get(&server_id)
            .is_some_and(|p| p.is_alive())
    }
}

#[async_trait]
impl ProcessSupervisor for StubSupervisor {
    async fn launch(
        &self,
        server_id: Uuid,
        spec: &LaunchSpec,
        console: Arc<ConsoleBuffer>,
    ) -> Result<Arc<dyn ManagedProcess>> {
        if self.fail_next_launch.swap(false, Ordering::SeqCst) {
            return Err(ManagerError::launch(format!(
                "simulated launch failure for `{}`",
                spec.executable
            )));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let process = Arc::new(StubProcess {
            exit_tx,
            exit_rx,
            console: console.clone(),
        });
        for line in &self.startup_lines {
            console.append(LineSource::Stdout, line.clone());
        }
        debug!(server = %server_id, "stub process launched");
        self.processes.insert(server_id, process.clone());
        Ok(process)
    }
}

pub struct StubProcess {
    exit_tx: watch::Sender<Option<ProcessExit>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    console: Arc<ConsoleBuffer>,
}

impl std::fmt::Debug for StubProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubProcess")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl StubProcess {
    fn finish(&self, exit: ProcessExit) {
        if self.exit_rx.borrow().is_some() {
            return;
        }
        self.console
            .append(LineSource::System, format!("Process ended ({})", exit.describe()));
        self.exit_tx.send_replace(Some(exit));
    }
}

#[async_trait]
impl ManagedProcess for StubProcess {
    fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => (*exit).unwrap_or(ProcessExit { code: None }),
            Err(_) => ProcessExit { code: None },
        }
    }

    async fn send_stdin(&self, line: &str) -> Result<()> {
        if !self.is_alive() {
            return Err(ManagerError::other("process control channel closed"));
        }
        if line.trim() == "stop" {
            // A real server flushes its world before exiting.
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.finish(ProcessExit { code: Some(0) });
        }
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.finish(ProcessExit { code: None });
        Ok(())
    }
}
