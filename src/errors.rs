//! Typed errors for the HTTP surface.
//!
//! Every error leaving a handler serializes to the envelope
//! `{"status": "error", "error": {"code", "message", "details"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRepo,
    InvalidRequest,
    NotIndexed,
    Busy,
    IndexDimensionMismatch,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRepo => "INVALID_REPO",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::NotIndexed => "NOT_INDEXED",
            ErrorCode::Busy => "BUSY",
            ErrorCode::IndexDimensionMismatch => "INDEX_DIMENSION_MISMATCH",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRepo | ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotIndexed => StatusCode::NOT_FOUND,
            ErrorCode::Busy | ErrorCode::IndexDimensionMismatch => StatusCode::CONFLICT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_repo(path: &str) -> Self {
        Self::new(
            ErrorCode::InvalidRepo,
            format!("Repository path does not exist or is not a directory: {path}"),
        )
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn not_indexed(path: &str) -> Self {
        Self::new(
            ErrorCode::NotIndexed,
            format!("No index exists for repository {path}; run /index first"),
        )
    }

    pub fn busy(path: &str) -> Self {
        Self::new(
            ErrorCode::Busy,
            format!("An index run is already in progress for {path}"),
        )
    }

    pub fn dimension_mismatch(index_dim: usize, model_dim: usize) -> Self {
        Self {
            code: ErrorCode::IndexDimensionMismatch,
            message: format!(
                "Indexed vectors are incompatible with the current embedding model \
                 (index_dim={index_dim}, model_dim={model_dim}); re-index with rebuild=true"
            ),
            details: Some(json!({ "index_dim": index_dim, "model_dim": model_dim })),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ApiError>() {
            Ok(api) => api,
            // Sanitized: internal error chains stay in the logs, not the wire.
            Err(err) => {
                tracing::error!("Internal error: {err:#}");
                Self::internal("Unexpected internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "details": self.details,
            }
        });
        (self.code.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings() {
        assert_eq!(ErrorCode::InvalidRepo.as_str(), "INVALID_REPO");
        assert_eq!(ErrorCode::Busy.as_str(), "BUSY");
        assert_eq!(
            ErrorCode::IndexDimensionMismatch.as_str(),
            "INDEX_DIMENSION_MISMATCH"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::InvalidRepo.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::NotIndexed.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Busy.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_dimension_mismatch_details() {
        let err = ApiError::dimension_mismatch(768, 384);
        let details = err.details.unwrap();
        assert_eq!(details["index_dim"], 768);
        assert_eq!(details["model_dim"], 384);
    }

    #[test]
    fn test_anyhow_conversion_is_sanitized() {
        let err: ApiError = anyhow::anyhow!("sqlite file is corrupt at offset 42").into();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(!err.message.contains("sqlite"));
    }

    #[test]
    fn test_anyhow_conversion_preserves_typed_errors() {
        let typed = anyhow::Error::new(ApiError::busy("/repo"));
        let err: ApiError = typed.into();
        assert_eq!(err.code, ErrorCode::Busy);
    }
}
