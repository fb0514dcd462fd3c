//! Wire types for the REST API. Request and response fields are camelCase to
//! match what panel frontends send.

use chrono::{DateTime, Utc};
use craftfleet_config::{Difficulty, Edition, GameMode, LaunchSpec};
use craftfleet_manager::{ConfigUpdate, CreateServer, PlayerCount, ServerSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServerRequest {
    pub name: String,
    #[serde(default)]
    pub edition: Edition,
    pub version: Option<String>,
    pub max_players: Option<u32>,
    pub motd: Option<String>,
    pub game_mode: Option<GameMode>,
    pub difficulty: Option<Difficulty>,
    pub launch: Option<LaunchSpec>,
}

impl From<CreateServerRequest> for CreateServer {
    fn from(request: CreateServerRequest) -> Self {
        CreateServer {
            name: request.name,
            edition: request.edition,
            version: request.version,
            max_players: request.max_players,
            motd: request.motd,
            game_mode: request.game_mode,
            difficulty: request.difficulty,
            launch: request.launch,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub motd: Option<String>,
    pub max_players: Option<u32>,
    pub game_mode: Option<GameMode>,
    pub difficulty: Option<Difficulty>,
    pub version: Option<String>,
    pub allowed_versions: Option<Vec<String>>,
}

impl From<UpdateServerRequest> for ConfigUpdate {
    fn from(request: UpdateServerRequest) -> Self {
        ConfigUpdate {
            name: request.name,
            motd: request.motd,
            max_players: request.max_players,
            game_mode: request.game_mode,
            difficulty: request.difficulty,
            version: request.version,
            allowed_versions: request.allowed_versions,
        }
    }
}

/// Full per-server view. The RCON password never leaves the manager.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetail {
    pub id: Uuid,
    pub name: String,
    pub edition: Edition,
    pub version: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub address: String,
    pub port: u16,
    pub max_players: u32,
    pub motd: String,
    pub game_mode: GameMode,
    pub difficulty: Difficulty,
    pub allowed_versions: Vec<String>,
    pub players: PlayerCount,
}

impl From<ServerSnapshot> for ServerDetail {
    fn from(snapshot: ServerSnapshot) -> Self {
        ServerDetail {
            id: snapshot.id,
            status: snapshot.status.as_str().to_string(),
            created_at: snapshot.created_at,
            address: snapshot.config.game_addr(),
            port: snapshot.config.port,
            motd: snapshot.config.motd_or_default(),
            players: PlayerCount {
                current: 0,
                max: snapshot.config.max_players,
            },
            name: snapshot.config.name,
            edition: snapshot.config.edition,
            version: snapshot.config.version,
            max_players: snapshot.config.max_players,
            game_mode: snapshot.config.game_mode,
            difficulty: snapshot.config.difficulty,
            allowed_versions: snapshot.config.allowed_versions,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsoleQuery {
    pub since: Option<u64>,
    pub limit: Option<usize>,
}
