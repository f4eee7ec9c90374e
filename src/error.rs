//! Error types for orchestration operations and API responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Result alias used by every orchestration operation
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Unsafe caller input (path or alias); raised before any process is spawned
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// External tool output did not have the expected shape
    #[error("Failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Model exists in the catalog but is not in the local cache yet
    #[error("Model {alias} has not been downloaded")]
    NotDownloaded { alias: String },

    /// Alias is unknown to the runtime catalog
    #[error("Model {alias} not found in the catalog")]
    NotFoundInCatalog { alias: String },

    #[error("Default cache path has not been captured yet")]
    DefaultPathUnset,

    /// No registered model with this logical id
    #[error("Model '{id}' not found")]
    ModelNotFound { id: String },

    /// Any other external failure
    #[error("{message}")]
    Operational { message: String },
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn operational(message: impl Into<String>) -> Self {
        Self::Operational {
            message: message.into(),
        }
    }

    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Whether the failure was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::ModelNotFound { .. } | Self::DefaultPathUnset
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            Self::DefaultPathUnset => StatusCode::CONFLICT,
            Self::Parse { .. }
            | Self::NotDownloaded { .. }
            | Self::NotFoundInCatalog { .. }
            | Self::Operational { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Operational {
            message: format!("{:#}", err),
        }
    }
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
