use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use craftfleet_manager::ManagerError;
use serde::Serialize;

/// JSON body returned for every error. `retryable` tells the client whether
/// repeating the same request unchanged can succeed.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug)]
pub struct ApiError(pub ManagerError);

impl From<ManagerError> for ApiError {
    fn from(error: ManagerError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagerError::Conflict(_) | ManagerError::InvalidState(_) => StatusCode::CONFLICT,
            ManagerError::Config(_) => StatusCode::BAD_REQUEST,
            ManagerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ManagerError::Launch(_)
            | ManagerError::Connection(_)
            | ManagerError::Auth(_)
            | ManagerError::ConnectionLost(_) => StatusCode::BAD_GATEWAY,
            ManagerError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            retryable: self.0.is_retry_safe(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (ManagerError::not_found("x"), StatusCode::NOT_FOUND),
            (ManagerError::conflict("x"), StatusCode::CONFLICT),
            (ManagerError::invalid_state("x"), StatusCode::CONFLICT),
            (ManagerError::config("x"), StatusCode::BAD_REQUEST),
            (ManagerError::timeout("x"), StatusCode::GATEWAY_TIMEOUT),
            (ManagerError::launch("x"), StatusCode::BAD_GATEWAY),
            (ManagerError::connection_lost("x"), StatusCode::BAD_GATEWAY),
            (ManagerError::other("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).into_response().status(), expected);
        }
    }
}
