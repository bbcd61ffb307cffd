//! Controller error type, with an `IntoResponse` impl for the thin HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("core error: {0}")]
    Core(#[from] uptime_core::Error),

    #[error("check not found: {0}")]
    CheckNotFound(i64),

    #[error("no probe connected for region: {0}")]
    NoProbeForRegion(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControllerError::CheckNotFound(_) => StatusCode::NOT_FOUND,
            ControllerError::NoProbeForRegion(_) => StatusCode::BAD_GATEWAY,
            ControllerError::Protocol(_) => StatusCode::BAD_REQUEST,
            ControllerError::Core(_) | ControllerError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
