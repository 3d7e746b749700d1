use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::backend::RelayError;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request body: {0}")]
    InvalidRequest(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("upstream stream failed: {0}")]
    UpstreamStream(String),

    #[error("inference backend unreachable: {0}")]
    UnreachableBackend(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::UpstreamStream(_) | AppError::UnreachableBackend(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match &err {
            RelayError::Unreachable(_) => AppError::UnreachableBackend(err.to_string()),
            _ => AppError::UpstreamStream(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // detail stays in the server log
        let body = match self {
            AppError::InvalidRequest(_) => "Invalid request body",
            AppError::MethodNotAllowed => "Method not allowed",
            AppError::UpstreamStream(_) | AppError::UnreachableBackend(_) => {
                "Internal server error"
            }
        };
        (self.status(), body).into_response()
    }
}

/// Decodes a JSON body without requiring a JSON content type.
pub fn decode_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::InvalidRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            AppError::UnreachableBackend("down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_relay_errors_map_by_kind() {
        let err: AppError = RelayError::Interrupted("reset".into()).into();
        assert!(matches!(err, AppError::UpstreamStream(_)));

        let err: AppError = RelayError::Status {
            status: 503,
            body: "busy".into(),
        }
        .into();
        assert!(matches!(err, AppError::UpstreamStream(_)));
    }

    #[test]
    fn test_decode_json_rejects_garbage() {
        let result: Result<crate::models::ErrorLog, _> = decode_json(b"{not json");
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }
}
