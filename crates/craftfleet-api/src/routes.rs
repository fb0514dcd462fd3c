use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use craftfleet_manager::{ConsoleLine, ServerSummary};
use serde_json::json;
use uuid::Uuid;

use crate::ApiState;
use crate::dto::{
    CommandRequest, CommandResponse, ConsoleQuery, CreateServerRequest, CreatedResponse,
    ServerDetail, UpdateServerRequest,
};
use crate::error::ApiError;

/// Default page size for console reads without an explicit limit.
const DEFAULT_CONSOLE_LIMIT: usize = 100;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn create_server(
    State(state): State<ApiState>,
    Json(request): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.fleet.create(request.into())?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse { id: handle.id() }),
    ))
}

pub async fn list_servers(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ServerSummary>>, ApiError> {
    Ok(Json(state.fleet.list().await))
}

pub async fn get_server(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServerDetail>, ApiError> {
    let snapshot = state.fleet.snapshot(id).await?;
    Ok(Json(snapshot.into()))
}

pub async fn update_server(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateServerRequest>,
) -> Result<Json<ServerDetail>, ApiError> {
    state.fleet.update(id, request.into()).await?;
    let snapshot = state.fleet.snapshot(id).await?;
    Ok(Json(snapshot.into()))
}

pub async fn delete_server(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.fleet.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Lifecycle requests are acknowledged once the transition is underway;
/// completion is observed by polling the server status.
pub async fn start_server(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.fleet.start(id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn stop_server(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.fleet.stop(id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn restart_server(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.fleet.restart(id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn run_command(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let response = state.fleet.send_command(id, request.text).await?;
    Ok(Json(CommandResponse { response }))
}

pub async fn console(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ConsoleQuery>,
) -> Result<Json<Vec<ConsoleLine>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_CONSOLE_LIMIT);
    let lines = state.fleet.console(id, query.since, limit)?;
    Ok(Json(lines))
}
