//! Control API errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::error::RelayError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("stream {0} does not exist")]
    NotFound(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Relay(RelayError),
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::UnknownStream(id) => ApiError::NotFound(id),
            RelayError::MalformedRequest(reason) => ApiError::Malformed(reason),
            other => ApiError::Relay(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::NotFound(_) => {
                tracing::info!(error = %self, "Request for unknown stream");
                (StatusCode::NOT_FOUND, "Not found").into_response()
            }
            ApiError::Malformed(_) | ApiError::Relay(_) => {
                tracing::warn!(error = %self, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}
