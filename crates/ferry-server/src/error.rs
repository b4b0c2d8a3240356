use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Session-level send failures. Both are expected conditions the router
/// recovers from; neither kills the calling task.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("session outbound buffer full")]
    BufferFull,

    #[error("session closed")]
    Closed,
}

/// Routing failures that surface to the sender. Registry and bus outages
/// are not here: those degrade to the offline path inside the router.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("message has no recipient or group")]
    MissingDestination,

    #[error("message sender is empty")]
    MissingSender,

    #[error("history store failure: {0}")]
    History(#[from] ferry_store::StoreError),
}

/// Errors on the HTTP surface (WebSocket upgrade path and health).
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] crate::auth::AuthError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::MissingToken => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
