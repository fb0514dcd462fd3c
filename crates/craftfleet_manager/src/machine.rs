//! Per-server state machine.
//!
//! Every server is owned by one task that serializes all lifecycle work.
//! Callers talk to it through a [`ServerHandle`]; status is observable at any
//! time through a watch channel, so lifecycle requests are acknowledged as
//! soon as the transition is underway rather than when it completes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use craftfleet_config::{Difficulty, GameMode, ServerConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::console::{ConsoleBuffer, LineSource};
use crate::error::{ManagerError, Result};
use crate::process::{ManagedProcess, ProcessExit, ProcessSupervisor};
use crate::rcon::{RconConnector, RconSession};

/// Grace period between a kill signal and giving up on the exit notice.
const KILL_WAIT: Duration = Duration::from_secs(5);

const COMMAND_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
    Crashed,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Restarting => "restarting",
            ServerStatus::Crashed => "crashed",
        }
    }

    /// A transition is in flight; only stop or restart (where allowed) and
    /// reads are accepted until it settles.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ServerStatus::Starting | ServerStatus::Stopping | ServerStatus::Restarting
        )
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing knobs for one server machine, derived from the fleet config.
#[derive(Debug, Clone, Copy)]
pub struct MachineTunables {
    /// Ceiling on launch + remote-console handshake before the start fails.
    pub startup_timeout: Duration,
    /// How long a graceful stop may take before the process is killed.
    pub stop_timeout: Duration,
    /// Delay between console connect attempts while the server boots.
    pub rcon_retry_interval: Duration,
}

impl Default for MachineTunables {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(30),
            rcon_retry_interval: Duration::from_millis(500),
        }
    }
}

/// Point-in-time view of one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub id: Uuid,
    pub status: ServerStatus,
    pub created_at: DateTime<Utc>,
    pub config: ServerConfig,
}

/// Partial update of mutable server settings. Absent fields keep their
/// current value; the merged result is validated before it is committed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub name: Option<String>,
    pub motd: Option<String>,
    pub max_players: Option<u32>,
    pub game_mode: Option<GameMode>,
    pub difficulty: Option<Difficulty>,
    pub version: Option<String>,
    pub allowed_versions: Option<Vec<String>>,
}

enum MachineCommand {
    Start { reply: oneshot::Sender<Result<()>> },
    Stop { reply: oneshot::Sender<Result<()>> },
    Restart { reply: oneshot::Sender<Result<()>> },
    Execute {
        command: String,
        reply: oneshot::Sender<Result<String>>,
    },
    UpdateConfig {
        update: ConfigUpdate,
        reply: oneshot::Sender<Result<ServerConfig>>,
    },
    Snapshot { reply: oneshot::Sender<ServerSnapshot> },
    Remove { reply: oneshot::Sender<Result<()>> },
}

/// Cheap, cloneable handle to one server's machine task.
#[derive(Clone)]
pub struct ServerHandle {
    id: Uuid,
    seq: u64,
    created_at: DateTime<Utc>,
    commands: mpsc::Sender<MachineCommand>,
    status: watch::Receiver<ServerStatus>,
    console: Arc<ConsoleBuffer>,
}

impl ServerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation order within the fleet, for stable listings.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ServerStatus> {
        self.status.clone()
    }

    pub fn console(&self) -> &Arc<ConsoleBuffer> {
        &self.console
    }

    /// Acknowledged once the transition to `starting` is underway.
    pub async fn start(&self) -> Result<()> {
        self.request(|reply| MachineCommand::Start { reply }).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| MachineCommand::Stop { reply }).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.request(|reply| MachineCommand::Restart { reply }).await
    }

    /// Runs a console command on a running server and returns the response.
    pub async fn execute(&self, command: impl Into<String>) -> Result<String> {
        let command = command.into();
        self.request(|reply| MachineCommand::Execute { command, reply })
            .await
    }

    pub async fn update_config(&self, update: ConfigUpdate) -> Result<ServerConfig> {
        self.request(|reply| MachineCommand::UpdateConfig { update, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<ServerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(MachineCommand::Snapshot { reply: tx })
            .await
            .map_err(|_| ManagerError::not_found("server no longer exists"))?;
        rx.await
            .map_err(|_| ManagerError::other("server task dropped the request"))
    }

    /// Shuts the machine task down. Refused while the server is running.
    pub async fn remove(&self) -> Result<()> {
        self.request(|reply| MachineCommand::Remove { reply }).await
    }

    /// Waits until the status satisfies the predicate, returning it.
    pub async fn wait_for_status(
        &self,
        mut pred: impl FnMut(ServerStatus) -> bool,
    ) -> Result<ServerStatus> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|status| pred(*status))
            .await
            .map_err(|_| ManagerError::other("server task ended"))?;
        Ok(*status)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> MachineCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ManagerError::not_found("server no longer exists"))?;
        rx.await
            .map_err(|_| ManagerError::other("server task dropped the request"))?
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

enum Flow {
    Continue,
    Shutdown,
}

enum GuardOutcome<T> {
    Done(T),
    /// A lifecycle request preempted the transition; its reply is still owed.
    Preempted(Preemption),
}

enum Preemption {
    Stop(oneshot::Sender<Result<()>>),
    Restart(oneshot::Sender<Result<()>>),
}

pub struct ServerMachine {
    id: Uuid,
    config: ServerConfig,
    tunables: MachineTunables,
    supervisor: Arc<dyn ProcessSupervisor>,
    connector: Arc<dyn RconConnector>,
    console: Arc<ConsoleBuffer>,
    created_at: DateTime<Utc>,
    status_tx: watch::Sender<ServerStatus>,
    cmd_rx: mpsc::Receiver<MachineCommand>,
    process: Option<Arc<dyn ManagedProcess>>,
    rcon: Option<Arc<dyn RconSession>>,
}

impl ServerMachine {
    /// Spawns the machine task for a server in the `stopped` state.
    pub fn spawn(
        config: ServerConfig,
        seq: u64,
        console_capacity: usize,
        tunables: MachineTunables,
        supervisor: Arc<dyn ProcessSupervisor>,
        connector: Arc<dyn RconConnector>,
    ) -> ServerHandle {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let console = Arc::new(ConsoleBuffer::new(console_capacity));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(ServerStatus::Stopped);

        let machine = ServerMachine {
            id,
            config,
            tunables,
            supervisor,
            connector,
            console: console.clone(),
            created_at,
            status_tx,
            cmd_rx,
            process: None,
            rcon: None,
        };
        tokio::spawn(machine.run());

        ServerHandle {
            id,
            seq,
            created_at,
            commands: cmd_tx,
            status: status_rx,
            console,
        }
    }

    async fn run(mut self) {
        debug!(server = %self.id, name = %self.config.name, "server machine started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if let Flow::Shutdown = self.handle_command(cmd).await {
                            break;
                        }
                    }
                    // Every handle is gone; bring the process down and exit.
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                exit = wait_exit(self.process.as_deref()) => self.on_process_exit(exit).await,
                () = wait_closed(self.rcon.as_deref()) => self.on_rcon_lost().await,
            }
        }
        debug!(server = %self.id, "server machine ended");
    }

    async fn handle_command(&mut self, cmd: MachineCommand) -> Flow {
        match cmd {
            MachineCommand::Start { reply } => self.handle_start(reply).await,
            MachineCommand::Stop { reply } => self.handle_stop(reply).await,
            MachineCommand::Restart { reply } => self.handle_restart(reply).await,
            MachineCommand::Execute { command, reply } => self.handle_execute(command, reply),
            MachineCommand::UpdateConfig { update, reply } => {
                let _ = reply.send(self.apply_update(update));
            }
            MachineCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            MachineCommand::Remove { reply } => {
                let status = self.status();
                if status == ServerStatus::Stopped {
                    let _ = reply.send(Ok(()));
                    return Flow::Shutdown;
                }
                let _ = reply.send(Err(ManagerError::invalid_state(format!(
                    "cannot delete a {status} server; stop it first"
                ))));
            }
        }
        Flow::Continue
    }

    async fn handle_start(&mut self, reply: oneshot::Sender<Result<()>>) {
        match self.status() {
            ServerStatus::Stopped | ServerStatus::Crashed => {}
            status => {
                let _ = reply.send(Err(ManagerError::invalid_state(format!(
                    "cannot start a {status} server"
                ))));
                return;
            }
        }

        self.set_status(ServerStatus::Starting);
        self.system_line("Starting server...");
        let _ = reply.send(Ok(()));

        self.boot_runtime("Startup").await;
    }

    /// Launches the process and waits for its console to come up, looping
    /// when a restart request preempts the wait. Ends `running`, `stopped`
    /// or `crashed`.
    async fn boot_runtime(&mut self, mut verb: &'static str) {
        loop {
            let spec = self.config.launch_spec();
            let process = match self
                .supervisor
                .launch(self.id, &spec, self.console.clone())
                .await
            {
                Ok(process) => process,
                Err(error) => {
                    self.fail_transition(&format!("{verb} failed: {error}"));
                    return;
                }
            };
            self.process = Some(process.clone());

            let online = await_online(
                self.connector.clone(),
                self.config.rcon_addr(),
                self.config.rcon_password.clone(),
                process,
                self.tunables,
            );
            match self.drive_preemptible(online).await {
                GuardOutcome::Done(Ok(session)) => {
                    self.rcon = Some(session);
                    self.set_status(ServerStatus::Running);
                    self.system_line("Server is ready");
                    return;
                }
                GuardOutcome::Done(Err(error)) => {
                    self.abort_runtime().await;
                    self.fail_transition(&format!("{verb} failed: {error}"));
                    return;
                }
                GuardOutcome::Preempted(Preemption::Stop(stop_reply)) => {
                    self.system_line("Stop requested during startup");
                    let _ = stop_reply.send(Ok(()));
                    self.set_status(ServerStatus::Stopping);
                    self.shutdown_exclusive().await;
                    self.set_status(ServerStatus::Stopped);
                    self.system_line("Server stopped");
                    return;
                }
                GuardOutcome::Preempted(Preemption::Restart(restart_reply)) => {
                    self.system_line("Restart requested during startup");
                    let _ = restart_reply.send(Ok(()));
                    self.set_status(ServerStatus::Restarting);
                    self.shutdown_exclusive().await;
                    verb = "Restart";
                }
            }
        }
    }

    async fn handle_stop(&mut self, reply: oneshot::Sender<Result<()>>) {
        match self.status() {
            // Stopping a crashed server clears it back to `stopped`.
            ServerStatus::Running | ServerStatus::Crashed => {}
            status => {
                let _ = reply.send(Err(ManagerError::invalid_state(format!(
                    "cannot stop a {status} server"
                ))));
                return;
            }
        }

        self.set_status(ServerStatus::Stopping);
        self.system_line("Stopping server...");
        let _ = reply.send(Ok(()));

        self.shutdown_exclusive().await;
        self.set_status(ServerStatus::Stopped);
        self.system_line("Server stopped");
    }

    async fn handle_restart(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.status() != ServerStatus::Running {
            let _ = reply.send(Err(ManagerError::invalid_state(format!(
                "cannot restart a {} server",
                self.status()
            ))));
            return;
        }

        self.set_status(ServerStatus::Restarting);
        self.system_line("Restarting server...");
        let _ = reply.send(Ok(()));

        self.shutdown_exclusive().await;
        self.boot_runtime("Restart").await;
    }

    /// Console commands run off the machine task so a slow server does not
    /// block lifecycle work.
    fn handle_execute(&mut self, command: String, reply: oneshot::Sender<Result<String>>) {
        if self.status() != ServerStatus::Running {
            let _ = reply.send(Err(ManagerError::invalid_state(format!(
                "cannot run commands on a {} server",
                self.status()
            ))));
            return;
        }
        let Some(rcon) = self.rcon.clone() else {
            let _ = reply.send(Err(ManagerError::other("no console session")));
            return;
        };

        self.console
            .append(LineSource::System, format!("> {command}"));
        let console = self.console.clone();
        tokio::spawn(async move {
            let result = rcon.execute(&command).await;
            if let Ok(response) = &result {
                if !response.is_empty() {
                    console.append(LineSource::RconResponse, response.clone());
                }
            }
            let _ = reply.send(result);
        });
    }

    fn apply_update(&mut self, update: ConfigUpdate) -> Result<ServerConfig> {
        let mut next = self.config.clone();
        if let Some(name) = update.name {
            next.name = name;
        }
        if let Some(motd) = update.motd {
            next.motd = Some(motd);
        }
        if let Some(max_players) = update.max_players {
            next.max_players = max_players;
        }
        if let Some(game_mode) = update.game_mode {
            next.game_mode = game_mode;
        }
        if let Some(difficulty) = update.difficulty {
            next.difficulty = difficulty;
        }
        if let Some(version) = update.version {
            next.version = version;
        }
        if let Some(allowed_versions) = update.allowed_versions {
            next.allowed_versions = allowed_versions;
        }
        next.validate()?;
        self.config = next.clone();
        Ok(next)
    }

    fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            id: self.id,
            status: self.status(),
            created_at: self.created_at,
            config: self.config.clone(),
        }
    }

    async fn on_process_exit(&mut self, exit: ProcessExit) {
        warn!(server = %self.id, exit = %exit.describe(), "server process exited unexpectedly");
        self.process = None;
        if let Some(rcon) = self.rcon.take() {
            rcon.shutdown().await;
        }
        self.set_status(ServerStatus::Crashed);
        self.system_line(&format!(
            "Server process exited unexpectedly ({})",
            exit.describe()
        ));
    }

    async fn on_rcon_lost(&mut self) {
        warn!(server = %self.id, "console connection lost; killing server process");
        self.rcon = None;
        self.abort_runtime().await;
        self.set_status(ServerStatus::Crashed);
        self.system_line("Lost console connection; server marked crashed");
    }

    /// Drives a transition future while answering commands that arrive in the
    /// meantime. Snapshots are served, a stop or restart request preempts the
    /// transition, and everything else is rejected as conflicting.
    async fn drive_preemptible<T>(&mut self, fut: impl Future<Output = T>) -> GuardOutcome<T> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return GuardOutcome::Done(out),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(MachineCommand::Stop { reply }) => {
                        return GuardOutcome::Preempted(Preemption::Stop(reply));
                    }
                    Some(MachineCommand::Restart { reply }) => {
                        return GuardOutcome::Preempted(Preemption::Restart(reply));
                    }
                    Some(cmd) => self.answer_during_transition(cmd),
                    None => return GuardOutcome::Done((&mut fut).await),
                },
            }
        }
    }

    /// Gracefully stops the runtime while rejecting every command that
    /// arrives, including further stops.
    async fn shutdown_exclusive(&mut self) {
        let fut = shutdown_runtime(
            self.process.take(),
            self.rcon.take(),
            self.config.stop_command.clone(),
            self.tunables.stop_timeout,
        );
        tokio::pin!(fut);
        loop {
            tokio::select! {
                () = &mut fut => return,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.answer_during_transition(cmd),
                    None => return (&mut fut).await,
                },
            }
        }
    }

    fn answer_during_transition(&self, cmd: MachineCommand) {
        let status = self.status();
        let conflict =
            || ManagerError::conflict(format!("another operation is in flight ({status})"));
        match cmd {
            MachineCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            MachineCommand::Start { reply }
            | MachineCommand::Stop { reply }
            | MachineCommand::Restart { reply }
            | MachineCommand::Remove { reply } => {
                let _ = reply.send(Err(conflict()));
            }
            MachineCommand::Execute { reply, .. } => {
                let _ = reply.send(Err(conflict()));
            }
            MachineCommand::UpdateConfig { reply, .. } => {
                let _ = reply.send(Err(conflict()));
            }
        }
    }

    /// Kills whatever is still live after a failed transition.
    async fn abort_runtime(&mut self) {
        if let Some(rcon) = self.rcon.take() {
            rcon.shutdown().await;
        }
        if let Some(process) = self.process.take() {
            if process.is_alive() {
                let _ = process.kill().await;
                let _ = time::timeout(KILL_WAIT, process.wait()).await;
            }
        }
    }

    async fn teardown(&mut self) {
        if self.process.is_some() || self.rcon.is_some() {
            shutdown_runtime(
                self.process.take(),
                self.rcon.take(),
                self.config.stop_command.clone(),
                self.tunables.stop_timeout,
            )
            .await;
        }
    }

    fn fail_transition(&mut self, line: &str) {
        warn!(server = %self.id, "{line}");
        self.set_status(ServerStatus::Crashed);
        self.system_line(line);
    }

    fn status(&self) -> ServerStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, status: ServerStatus) {
        let previous = self.status();
        if previous != status {
            info!(server = %self.id, from = %previous, to = %status, "status change");
            self.status_tx.send_replace(status);
        }
    }

    fn system_line(&self, text: &str) {
        self.console.append(LineSource::System, text.to_string());
    }
}

/// A server counts as online once its remote console accepts our password;
/// that proves the port is bound and the command path works. Connection
/// errors are retried until the startup deadline, a rejected password is
/// final, and a process death short-circuits the wait.
async fn await_online(
    connector: Arc<dyn RconConnector>,
    addr: String,
    password: String,
    process: Arc<dyn ManagedProcess>,
    tunables: MachineTunables,
) -> Result<Arc<dyn RconSession>> {
    let connect_loop = async {
        loop {
            match connector.connect(&addr, &password).await {
                Ok(session) => return Ok(session),
                Err(error @ ManagerError::Auth(_)) => return Err(error),
                Err(error) => {
                    debug!(%addr, %error, "console not reachable yet; retrying");
                    time::sleep(tunables.rcon_retry_interval).await;
                }
            }
        }
    };
    tokio::select! {
        result = time::timeout(tunables.startup_timeout, connect_loop) => match result {
            Ok(session) => session,
            Err(_) => Err(ManagerError::timeout(format!(
                "server did not become ready within {:?}",
                tunables.startup_timeout
            ))),
        },
        exit = process.wait() => Err(ManagerError::launch(format!(
            "process exited during startup ({})",
            exit.describe()
        ))),
    }
}

/// Graceful shutdown: close the console session, ask the server to save and
/// exit over stdin, and kill it if it overstays the grace period.
async fn shutdown_runtime(
    process: Option<Arc<dyn ManagedProcess>>,
    rcon: Option<Arc<dyn RconSession>>,
    stop_command: String,
    stop_timeout: Duration,
) {
    if let Some(rcon) = rcon {
        rcon.shutdown().await;
    }
    let Some(process) = process else { return };
    if !process.is_alive() {
        return;
    }
    let asked = process.send_stdin(&stop_command).await.is_ok();
    if asked && time::timeout(stop_timeout, process.wait()).await.is_ok() {
        return;
    }
    warn!("server ignored the stop command; killing the process");
    let _ = process.kill().await;
    let _ = time::timeout(KILL_WAIT, process.wait()).await;
}

async fn wait_exit(process: Option<&dyn ManagedProcess>) -> ProcessExit {
    match process {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}

async fn wait_closed(rcon: Option<&dyn RconSession>) {
    match rcon {
        Some(rcon) => rcon.closed().await,
        None => std::future::pending().await,
    }
}
