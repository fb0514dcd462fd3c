use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use craftfleet_config::LaunchSpec;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::console::{ConsoleBuffer, LineSource};
use crate::error::{ManagerError, Result};
use crate::process::{ManagedProcess, ProcessExit, ProcessSupervisor};

const CONTROL_QUEUE: usize = 8;

enum ProcessControl {
    Stdin(String),
    Kill,
}

/// Launches real OS processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSupervisor;

impl LocalSupervisor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn launch(
        &self,
        server_id: Uuid,
        spec: &LaunchSpec,
        console: Arc<ConsoleBuffer>,
    ) -> Result<Arc<dyn ManagedProcess>> {
        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            ManagerError::launch(format!("failed to spawn `{}`: {e}", spec.executable))
        })?;
        debug!(server = %server_id, pid = ?child.id(), "process spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ManagerError::launch("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ManagerError::launch("stderr not captured"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ManagerError::launch("stdin not captured"))?;

        tokio::spawn(forward_lines(stdout, console.clone()));
        tokio::spawn(forward_lines(stderr, console.clone()));

        let (exit_tx, exit_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        tokio::spawn(supervise(server_id, child, stdin, control_rx, exit_tx, console));

        Ok(Arc::new(LocalProcess {
            exit: exit_rx,
            control: control_tx,
        }))
    }
}

async fn forward_lines(stream: impl AsyncRead + Unpin, console: Arc<ConsoleBuffer>) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        console.append(LineSource::Stdout, line);
    }
}

/// Owns the child: serves stdin writes and kill requests, publishes the exit
/// status exactly once.
async fn supervise(
    server_id: Uuid,
    mut child: Child,
    mut stdin: ChildStdin,
    mut control: mpsc::Receiver<ProcessControl>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    console: Arc<ConsoleBuffer>,
) {
    let exit = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ProcessExit { code: status.code() },
                    Err(e) => {
                        warn!(server = %server_id, "wait on child failed: {e}");
                        ProcessExit { code: None }
                    }
                };
            }
            message = control.recv() => match message {
                Some(ProcessControl::Stdin(line)) => {
                    if let Err(e) = stdin.write_all(line.as_bytes()).await {
                        warn!(server = %server_id, "stdin write failed: {e}");
                    }
                    let _ = stdin.flush().await;
                }
                Some(ProcessControl::Kill) => {
                    debug!(server = %server_id, "killing process");
                    let _ = child.start_kill();
                }
                // No more control requests; keep waiting for the exit.
                None => {
                    let status = child.wait().await;
                    break ProcessExit { code: status.ok().and_then(|s| s.code()) };
                }
            },
        }
    };
    console.append(LineSource::System, format!("Process ended ({})", exit.describe()));
    exit_tx.send_replace(Some(exit));
    debug!(server = %server_id, "process exited ({})", exit.describe());
}

#[derive(Debug)]
struct LocalProcess {
    exit: watch::Receiver<Option<ProcessExit>>,
    control: mpsc::Sender<ProcessControl>,
}

#[async_trait]
impl ManagedProcess for LocalProcess {
    fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit.clone();
        match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => (*exit).unwrap_or(ProcessExit { code: None }),
            // Supervision task gone; treat as a signal death.
            Err(_) => ProcessExit { code: None },
        }
    }

    async fn send_stdin(&self, line: &str) -> Result<()> {
        let line = if line.ends_with('\n') {
            line.to_string()
        } else {
            format!("{line}\n")
        };
        self.control
            .send(ProcessControl::Stdin(line))
            .await
            .map_err(|_| ManagerError::other("process control channel closed"))
    }

    async fn kill(&self) -> Result<()> {
        self.control
            .send(ProcessControl::Kill)
            .await
            .map_err(|_| ManagerError::other("process control channel closed"))
    }
}
