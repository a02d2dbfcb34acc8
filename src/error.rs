// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! The first five variants are the failure kinds of the reconciliation
//! engine. Callers decide what to do with them through the `is_*` helpers:
//! transient failures leave the activity unprocessed for the next cycle,
//! everything else is logged and dropped.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Network failure or 5xx/429 from a provider. Retried on the next cycle.
    #[error("Provider temporarily unavailable: {0}")]
    TransientProvider(String),

    /// Token refresh failed; the linked account must be disconnected.
    #[error("Provider authorization expired: {0}")]
    AuthExpired(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed or too-short activity evidence.
    #[error("Invalid activity: {0}")]
    Validation(String),

    /// A ban or removal only partially applied. Local state is left as-is.
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True when the failed operation should be retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientProvider(_) | AppError::Database(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, AppError::AuthExpired(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(anyhow::anyhow!("JSON error: {}", err))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_activity",
                Some(msg.clone()),
            ),
            AppError::TransientProvider(msg) => {
                (StatusCode::BAD_GATEWAY, "provider_error", Some(msg.clone()))
            }
            AppError::AuthExpired(msg) => {
                (StatusCode::BAD_GATEWAY, "provider_auth_expired", Some(msg.clone()))
            }
            AppError::Consistency(msg) => {
                tracing::error!(error = %msg, "Consistency error");
                (StatusCode::CONFLICT, "consistency_error", None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
