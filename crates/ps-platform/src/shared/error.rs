//! Platform Error Types

use thiserror::Error;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response, Json},
};
use utoipa::ToSchema;

use crate::platform::operations::CreationError;
use crate::repository::StorageError;

/// Message returned for every 500; details go to the observer only
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred";

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlatformError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Error response body
#[derive(Debug, serde::Serialize, serde::Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            PlatformError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            PlatformError::Validation { message } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message.clone()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_ERROR_MESSAGE.to_string(),
            ),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<CreationError> for PlatformError {
    fn from(err: CreationError) -> Self {
        match err {
            CreationError::Validation(message) => PlatformError::Validation { message },
            CreationError::Storage(e) => PlatformError::Storage(e),
            other => PlatformError::Internal { message: other.to_string() },
        }
    }
}

/// Malformed or mistyped request bodies are client errors
impl From<JsonRejection> for PlatformError {
    fn from(rejection: JsonRejection) -> Self {
        PlatformError::Validation { message: rejection.body_text() }
    }
}
