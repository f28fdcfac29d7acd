use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the archive. Storage-layer failures are folded into
/// these variants before they reach a handler.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ArchiveError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ArchiveError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ArchiveError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ArchiveError::Conflict(msg.into())
    }

    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ArchiveError::NotFound(_) => "not_found",
            ArchiveError::Validation(_) => "validation_error",
            ArchiveError::Conflict(_) => "conflict",
            ArchiveError::Storage(_) => "storage_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ArchiveError::NotFound(_) => StatusCode::NOT_FOUND,
            ArchiveError::Validation(_) => StatusCode::BAD_REQUEST,
            ArchiveError::Conflict(_) => StatusCode::CONFLICT,
            ArchiveError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ArchiveError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ArchiveError::NotFound(what) => {
                tracing::info!("Resource not found: {}", what);
                self.to_string()
            }
            ArchiveError::Validation(msg) => {
                tracing::warn!("Rejected request: {}", msg);
                self.to_string()
            }
            ArchiveError::Conflict(msg) => {
                tracing::warn!("Conflict: {}", msg);
                self.to_string()
            }
            ArchiveError::Storage(err) => {
                tracing::error!("Storage failure: {:#}", err);
                "Storage operation failed".to_string()
            }
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
