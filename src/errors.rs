use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failure to obtain an upstream bearer token. Fatal to a whole batch run.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("token endpoint rejected credentials (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token endpoint returned an unreadable response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("a bulk MOT run is already in progress")]
    RunInProgress,

    #[error("upstream authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidRegistration(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_registration",
                reason.clone(),
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                format!("{} not found", what),
            ),
            AppError::RunInProgress => (
                StatusCode::CONFLICT,
                "conflict_error",
                "run_in_progress",
                "a bulk MOT run is already in progress".to_string(),
            ),
            AppError::Auth(e) => {
                tracing::error!("upstream auth error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "upstream_auth_failed",
                    "could not authenticate with the MOT history service".to_string(),
                )
            }
            AppError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                e.clone(),
            ),
            AppError::NotConfigured(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable_error",
                "not_configured",
                format!("{} is not configured on this server", what),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
