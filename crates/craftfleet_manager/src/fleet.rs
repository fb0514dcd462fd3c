//! Fleet-wide registry: owns every server handle, allocates ports, and fans
//! requests out to the per-server machines.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use craftfleet_config::{
    Difficulty, Edition, FleetConfig, GameMode, LaunchSpec, ServerConfig,
};
use dashmap::DashMap;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::console::ConsoleLine;
use crate::error::{ManagerError, Result};
use crate::machine::{
    ConfigUpdate, MachineTunables, ServerHandle, ServerMachine, ServerSnapshot, ServerStatus,
};
use crate::process::ProcessSupervisor;
use crate::rcon::RconConnector;

/// Highest game port we hand out; the RCON port sits a fixed offset above it
/// and must stay inside the u16 range.
const MAX_GAME_PORT: u32 = 55534;

const RCON_PASSWORD_LEN: usize = 16;

/// Request to provision a new server. Everything beyond the name falls back
/// to edition defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServer {
    pub name: String,
    #[serde(default)]
    pub edition: Edition,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub max_players: Option<u32>,
    #[serde(default)]
    pub motd: Option<String>,
    #[serde(default)]
    pub game_mode: Option<GameMode>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub launch: Option<LaunchSpec>,
}

impl CreateServer {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            edition: Edition::default(),
            version: None,
            max_players: None,
            motd: None,
            game_mode: None,
            difficulty: None,
            launch: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlayerCount {
    pub current: u32,
    pub max: u32,
}

/// Listing row for one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub id: Uuid,
    pub name: String,
    pub edition: Edition,
    pub version: String,
    pub address: String,
    pub status: ServerStatus,
    pub players: PlayerCount,
}

pub struct FleetRegistry {
    servers: DashMap<Uuid, ServerHandle>,
    seq: AtomicU64,
    next_port: AtomicU32,
    host: String,
    console_capacity: usize,
    tunables: MachineTunables,
    supervisor: Arc<dyn ProcessSupervisor>,
    connector: Arc<dyn RconConnector>,
}

impl FleetRegistry {
    pub fn new(
        config: &FleetConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        connector: Arc<dyn RconConnector>,
    ) -> Self {
        Self {
            servers: DashMap::new(),
            seq: AtomicU64::new(0),
            next_port: AtomicU32::new(u32::from(config.base_port)),
            host: config.host.clone(),
            console_capacity: config.console_capacity,
            tunables: MachineTunables {
                startup_timeout: config.startup_timeout,
                stop_timeout: config.stop_timeout,
                rcon_retry_interval: config.rcon.retry_interval,
            },
            supervisor,
            connector,
        }
    }

    /// Provisions a server: allocates its port pair, generates an RCON
    /// password, and spawns its machine in the `stopped` state.
    pub fn create(&self, request: CreateServer) -> Result<ServerHandle> {
        let port = self.allocate_port()?;
        let mut config = ServerConfig::new(request.name, request.edition, self.host.clone(), port);
        config.rcon_password = random_password();
        if let Some(version) = request.version {
            config.version = version;
        }
        if let Some(max_players) = request.max_players {
            config.max_players = max_players;
        }
        if let Some(motd) = request.motd {
            config.motd = Some(motd);
        }
        if let Some(game_mode) = request.game_mode {
            config.game_mode = game_mode;
        }
        if let Some(difficulty) = request.difficulty {
            config.difficulty = difficulty;
        }
        if let Some(launch) = request.launch {
            config.launch = Some(launch);
        }
        config.validate()?;
        info!(name = %config.name, port, "provisioning server");
        Ok(self.spawn(config))
    }

    /// Registers a server that was declared in the fleet config file, keeping
    /// its declared ports out of the allocator's range.
    pub fn adopt(&self, config: ServerConfig) -> Result<ServerHandle> {
        config.validate()?;
        self.next_port
            .fetch_max(u32::from(config.port) + 1, Ordering::SeqCst);
        info!(name = %config.name, port = config.port, "adopting configured server");
        Ok(self.spawn(config))
    }

    fn spawn(&self, config: ServerConfig) -> ServerHandle {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let handle = ServerMachine::spawn(
            config,
            seq,
            self.console_capacity,
            self.tunables,
            self.supervisor.clone(),
            self.connector.clone(),
        );
        self.servers.insert(handle.id(), handle.clone());
        handle
    }

    fn allocate_port(&self) -> Result<u16> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        if port > MAX_GAME_PORT {
            return Err(ManagerError::config("port space exhausted"));
        }
        Ok(port as u16)
    }

    pub fn get(&self, id: Uuid) -> Result<ServerHandle> {
        self.servers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ManagerError::not_found(format!("no server with id {id}")))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// All servers in creation order.
    pub async fn list(&self) -> Vec<ServerSummary> {
        let mut handles: Vec<ServerHandle> =
            self.servers.iter().map(|entry| entry.value().clone()).collect();
        handles.sort_by_key(ServerHandle::seq);

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            // A server may be deleted between the scan and the snapshot.
            if let Ok(snapshot) = handle.snapshot().await {
                summaries.push(summarize(&snapshot));
            }
        }
        summaries
    }

    pub async fn describe(&self, id: Uuid) -> Result<ServerSummary> {
        let snapshot = self.get(id)?.snapshot().await?;
        Ok(summarize(&snapshot))
    }

    pub async fn snapshot(&self, id: Uuid) -> Result<ServerSnapshot> {
        self.get(id)?.snapshot().await
    }

    /// Deletes a server. The machine refuses while it is running, so the
    /// registry entry only goes away once the task has agreed to shut down.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let handle = self.get(id)?;
        handle.remove().await?;
        self.servers.remove(&id);
        info!(server = %id, "server deleted");
        Ok(())
    }

    pub async fn start(&self, id: Uuid) -> Result<()> {
        self.get(id)?.start().await
    }

    pub async fn stop(&self, id: Uuid) -> Result<()> {
        self.get(id)?.stop().await
    }

    pub async fn restart(&self, id: Uuid) -> Result<()> {
        self.get(id)?.restart().await
    }

    pub async fn send_command(&self, id: Uuid, command: impl Into<String>) -> Result<String> {
        self.get(id)?.execute(command).await
    }

    pub async fn update(&self, id: Uuid, update: ConfigUpdate) -> Result<ServerConfig> {
        self.get(id)?.update_config(update).await
    }

    /// The newest console lines, or everything after `since` when given.
    pub fn console(&self, id: Uuid, since: Option<u64>, limit: usize) -> Result<Vec<ConsoleLine>> {
        let handle = self.get(id)?;
        let lines = match since {
            Some(cursor) => handle.console().lines_since(cursor),
            None => handle.console().snapshot(limit),
        };
        Ok(lines)
    }
}

fn summarize(snapshot: &ServerSnapshot) -> ServerSummary {
    ServerSummary {
        id: snapshot.id,
        name: snapshot.config.name.clone(),
        edition: snapshot.config.edition,
        version: snapshot.config.version.clone(),
        address: snapshot.config.game_addr(),
        status: snapshot.status,
        // Live player polling is not wired up; the count reads zero.
        players: PlayerCount {
            current: 0,
            max: snapshot.config.max_players,
        },
    }
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RCON_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_long_and_alphanumeric() {
        let password = random_password();
        assert_eq!(password.len(), RCON_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, random_password());
    }
}
