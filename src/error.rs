//! # Error Handling Module
//!
//! Provides structured error types for cache, refresh and API operations.
//! Errors raised while serving a request are rendered as JSON for API consumers;
//! errors raised during a refresh are logged and the affected table is skipped.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Error type for all cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Remote source unreachable or returned a non-success status
    #[error("Network error: {0}")]
    Network(String),

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Local table create/query/insert/transaction failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing or malformed request input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Inactive or unset membership
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No credential configured for the remote source
    #[error("No credential configured for table {0}")]
    MissingCredential(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid table or column name
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CacheError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CacheError::Validation(_) => StatusCode::BAD_REQUEST,
            CacheError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::Forbidden(_) => StatusCode::FORBIDDEN,
            CacheError::Network(_)
            | CacheError::Decode(_)
            | CacheError::Storage(_)
            | CacheError::MissingCredential(_)
            | CacheError::Config(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            CacheError::Network(_) => "NETWORK_ERROR",
            CacheError::Decode(_) => "DECODE_ERROR",
            CacheError::Storage(_) => "STORAGE_ERROR",
            CacheError::Validation(_) => "INVALID_REQUEST",
            CacheError::NotFound(_) => "NOT_FOUND",
            CacheError::Forbidden(_) => "FORBIDDEN",
            CacheError::MissingCredential(_) => "MISSING_CREDENTIAL",
            CacheError::Config(_) => "CONFIG_ERROR",
            CacheError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            CacheError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for failures of the local database
    pub fn is_storage(&self) -> bool {
        matches!(self, CacheError::Storage(_))
    }
}

/// Converts CacheError into an Axum HTTP response
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            },
            "success": false,
        }));

        (status, body).into_response()
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for CacheError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CacheError::Decode(err.to_string())
        } else {
            CacheError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            CacheError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CacheError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CacheError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            CacheError::Storage("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CacheError::Network("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_message_carries_cause() {
        let err = CacheError::Storage("no such table: Films".into());
        assert_eq!(err.to_string(), "Storage error: no such table: Films");
        assert!(err.is_storage());
    }
}
