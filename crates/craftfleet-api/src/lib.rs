pub mod dto;
mod error;
mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use craftfleet_manager::FleetRegistry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ErrorResponse};

#[derive(Clone)]
pub struct ApiState {
    pub fleet: Arc<FleetRegistry>,
}

/// Builds the REST router over a fleet registry.
pub fn create_app(fleet: Arc<FleetRegistry>) -> Router {
    let state = ApiState { fleet };
    Router::new()
        .route("/health", get(routes::health))
        .route("/servers", post(routes::create_server).get(routes::list_servers))
        .route(
            "/servers/{id}",
            get(routes::get_server)
                .put(routes::update_server)
                .delete(routes::delete_server),
        )
        .route("/servers/{id}/start", post(routes::start_server))
        .route("/servers/{id}/stop", post(routes::stop_server))
        .route("/servers/{id}/restart", post(routes::restart_server))
        .route("/servers/{id}/command", post(routes::run_command))
        .route("/servers/{id}/console", get(routes::console))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
