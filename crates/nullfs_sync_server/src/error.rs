//! Error types for the pull endpoint server.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use nullfs_journal::JournalError;
use nullfs_sync_engine::SyncError;
use thiserror::Error;
use tracing::error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by request handlers.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed request.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Missing or wrong credentials.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Valid credentials without access to the volume.
    #[error("not authorized: {0}")]
    Forbidden(String),

    /// Unknown volume or blob.
    #[error("not found: {0}")]
    NotFound(String),

    /// Journal or store failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status sent for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<SyncError> for ServerError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::AuthFailure { .. } => ServerError::Unauthorized(message),
            SyncError::Denied { .. } => ServerError::Forbidden(message),
            SyncError::UnknownVolume(_) | SyncError::Journal(JournalError::BlobNotFound(_)) => {
                ServerError::NotFound(message)
            }
            SyncError::Protocol(_) => ServerError::BadRequest(message),
            _ => ServerError::Internal(message),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            error!(error = %self, "request failed");
        }
        let mut response = (status, Json(serde_json::json!({ "error": self.to_string() })))
            .into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"nullfs\""),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::BadRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::NotFound("x".into()).is_server_error());
    }

    #[test]
    fn sync_errors_map_to_statuses() {
        let cases = [
            (
                SyncError::AuthFailure {
                    peer: "edge".into(),
                    reason: "bad password".into(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                SyncError::UnknownVolume("music".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                SyncError::Journal(JournalError::BlobNotFound("ab".into())),
                StatusCode::NOT_FOUND,
            ),
            (SyncError::Halted("docs".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status_code(), status);
        }
    }

    #[test]
    fn unauthorized_carries_a_challenge() {
        let response = ServerError::Unauthorized("no".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
