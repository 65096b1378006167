//! Unified error handling for the wire backend
//!
//! Provides the service error taxonomy, HTTP status mapping, and the
//! canonical `{success, data, error}` response envelope.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical API response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Service-level error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Rate limit exceeded")]
    RateLimited,

    /// A backing store or peer was unreachable. `trust_critical` requests
    /// (e.g. the ban check) surface as 503 rather than 500.
    #[error("Dependency unavailable: {message}")]
    Dependency { message: String, trust_critical: bool },

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        AppError::Dependency {
            message: msg.into(),
            trust_critical: false,
        }
    }

    /// Dependency failure on a trust-critical path; always maps to 503.
    pub fn trust_dependency(msg: impl Into<String>) -> Self {
        AppError::Dependency {
            message: msg.into(),
            trust_critical: true,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Unauthorized(_) => 401,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::PayloadTooLarge => 413,
            AppError::RateLimited => 429,
            AppError::Dependency { trust_critical, .. } => {
                if *trust_critical {
                    503
                } else {
                    500
                }
            }
            AppError::Internal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Dependency { .. } => "DEPENDENCY_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to clients. Internal details stay in logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Dependency { .. } => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self))
            .json(ApiResponse::<()>::err(self.public_message()))
    }
}

/// Result type alias for service operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AppError::validation("bad field").status_code(), 400);
        assert_eq!(AppError::unauthorized("Invalid credentials").status_code(), 401);
        assert_eq!(AppError::forbidden("no").status_code(), 403);
        assert_eq!(AppError::not_found("post").status_code(), 404);
        assert_eq!(AppError::conflict("handle taken").status_code(), 409);
        assert_eq!(AppError::PayloadTooLarge.status_code(), 413);
        assert_eq!(AppError::RateLimited.status_code(), 429);
        assert_eq!(AppError::internal("boom").status_code(), 500);
    }

    #[test]
    fn test_dependency_trust_criticality() {
        assert_eq!(AppError::dependency("kv down").status_code(), 500);
        assert_eq!(AppError::trust_dependency("ban store down").status_code(), 503);
    }

    #[test]
    fn test_internal_message_is_opaque() {
        let err = AppError::internal("corrupt blob at user:42");
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_envelope_shape() {
        let ok = ApiResponse::ok(serde_json::json!({"id": "1"}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());

        let err = ApiResponse::<()>::err("handle already taken");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "handle already taken");
    }
}
