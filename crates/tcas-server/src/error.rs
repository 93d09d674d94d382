use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tcas_cas::CasError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Cas(#[from] CasError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: usize },

    #[error("upload size unknown: content-length required")]
    LengthRequired,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl ServerError {
    /// Conflicts and lookup misses are final; only 503 is worth retrying.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Cas(e) if e.is_conflict() => StatusCode::CONFLICT,
            Self::Cas(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Cas(e) if e.is_digest_mismatch() => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Cas(e) if e.is_invalid_request() => StatusCode::BAD_REQUEST,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::Cas(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Io(e) if tcas_cas::error::is_transient_io(e) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
