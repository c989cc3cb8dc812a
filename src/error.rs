//! Error types for the prompt shield.
//!
//! Defines a unified error type that maps cleanly to HTTP responses. Blocked
//! prompts and blocked responses are not errors; they are pipeline outcomes
//! with their own response bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::domain::{DetectorKind, StrategyVariant};

/// Unified error type for shield operations.
#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No implementation for detector '{kind}' with strategy '{strategy}'")]
    UnsupportedStrategy {
        kind: DetectorKind,
        strategy: StrategyVariant,
    },

    #[error("Policy reload failed: {0}")]
    PolicyReload(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Generation backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body for API clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ShieldError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ShieldError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
            ShieldError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                "Configuration error".to_string(),
                Some(msg.clone()),
            ),
            ShieldError::UnsupportedStrategy { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "UNSUPPORTED_STRATEGY",
                self.to_string(),
                None,
            ),
            ShieldError::PolicyReload(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "POLICY_RELOAD_ERROR",
                "Policy reload failed; the previous policy is still active".to_string(),
                Some(msg.clone()),
            ),
            ShieldError::ExternalService(e) => {
                // Log the actual error but don't expose internals
                tracing::error!(error = %e, "External service error");
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_SERVICE_ERROR",
                    "An upstream service call failed".to_string(),
                    None,
                )
            }
            ShieldError::BackendUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BACKEND_UNAVAILABLE",
                msg.clone(),
                None,
            ),
            ShieldError::Serialization(e) => (
                StatusCode::BAD_REQUEST,
                "SERIALIZATION_ERROR",
                "Failed to process request/response".to_string(),
                Some(e.to_string()),
            ),
            ShieldError::Io(e) => {
                tracing::error!(error = %e, "I/O error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IO_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ShieldError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for shield operations.
pub type ShieldResult<T> = Result<T, ShieldError>;
