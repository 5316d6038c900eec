//! Gateway response and error types shared across handlers.

use super::*;

use axum::http::StatusCode;

/// Aggregate view over the activity store served by the activity endpoint.
#[derive(Debug, Serialize)]
pub struct ActivitySnapshot {
    pub repositories: u64,
    pub open_tasks: u64,
    pub webhook_events: u64,
    pub event_types: Vec<EventTypeCount>,
    pub recent_git_events: Vec<GitEventRecord>,
}

/// Error payload rendered as `{"error": ..., "message": ...}`.
#[derive(Debug)]
pub(super) struct GatewayApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl GatewayApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Bad Request", message)
    }

    pub(super) fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found", message)
    }

    pub(super) fn store_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "store not configured",
            "start the server with --db-path to enable persistence",
        )
    }

    pub(super) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", message)
    }
}

impl IntoResponse for GatewayApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.error,
                "message": self.message,
            })),
        )
            .into_response()
    }
}
