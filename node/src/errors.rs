// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Infrastructure failures of a uniqueness provider.
///
/// Conflicts and time-window failures are not errors; they come back as
/// `UniquenessResult::Failure`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("No quorum of matching replies: {0}")]
    NoQuorum(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Provider stopped")]
    Stopped,
}

impl ProviderError {
    /// Whether the caller may retry with the same request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::Transport(_) | ProviderError::Timeout
        )
    }
}

impl IntoResponse for ProviderError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProviderError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProviderError::Unavailable(_) | ProviderError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
            ProviderError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProviderError::Transport(_) | ProviderError::NoQuorum(_) => StatusCode::BAD_GATEWAY,
            ProviderError::Storage(_) | ProviderError::RetriesExhausted { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<notary_persistence::PersistenceError> for ProviderError {
    fn from(e: notary_persistence::PersistenceError) -> Self {
        ProviderError::Storage(e.to_string())
    }
}
