//! HTTP error handling for the web API.
//!
//! This module provides conversion from core library errors to appropriate
//! HTTP responses with JSON error bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Error code (e.g., "E102" for an unknown session)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message
    pub message: String,
    /// Additional details about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Chunks received so far (incomplete uploads only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<u32>,
    /// Chunks expected (incomplete uploads only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(skip)]
    status: Option<StatusCode>,
}

impl ApiError {
    /// Create a new API error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
            uploaded: None,
            total: None,
            status: None,
        }
    }

    /// Create a new API error with code and message.
    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::new(message)
        }
    }

    /// Add details to the error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        if let Some(status) = self.status {
            return status;
        }
        match self.code.as_deref() {
            Some("E101" | "E103") => StatusCode::BAD_REQUEST,
            Some("E102") => StatusCode::NOT_FOUND,
            Some("E104") => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code("E101", message)
    }

    /// Create an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: Some(StatusCode::UNAUTHORIZED),
            ..Self::new(message)
        }
    }

    /// Create an internal server error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.code().is_none() {
            tracing::error!(error = %err, "Request failed");
        }

        let mut api = Self {
            code: err.code().map(String::from),
            message: err.to_string(),
            details: err.suggestion().map(String::from),
            ..Self::new(String::new())
        };

        if let Error::IncompleteUpload { uploaded, total } = err {
            api.uploaded = Some(uploaded);
            api.total = Some(total);
        }

        api
    }
}

/// Result type for web handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            ApiError::from(Error::invalid("x")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::SessionNotFound("s".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(Error::IncompleteUpload {
                uploaded: 1,
                total: 3
            })
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::Internal("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::unauthorized("no").status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_incomplete_upload_carries_counts() {
        let err = ApiError::from(Error::IncompleteUpload {
            uploaded: 2,
            total: 5,
        });
        let json = serde_json::to_string(&err).unwrap();

        assert!(json.contains("\"code\":\"E103\""));
        assert!(json.contains("\"uploaded\":2"));
        assert!(json.contains("\"total\":5"));
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let err = ApiError::with_code("E102", "upload session 'x' not found");
        let json = serde_json::to_string(&err).unwrap();

        assert!(json.contains("\"message\""));
        assert!(!json.contains("details"));
        assert!(!json.contains("uploaded"));
        assert!(!json.contains("status"));
    }
}
