//! Error handling for the Brandreach backend
//!
//! Centralized error management providing consistent error types, HTTP
//! status code mapping, and automatic error logging. Each variant maps to
//! one of the failure categories surfaced to API callers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// Comprehensive error type covering all platform operations
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors
    Database(anyhow::Error),
    /// Storage-layer transient errors (connection loss, pool exhaustion)
    StorageUnavailable(String),
    /// Authentication/authorization errors
    Auth(String),
    /// Validation errors
    Validation(String),
    /// Unknown tracking code, link, conversion, or payout
    NotFound(String),
    /// Conversion reported outside the attribution window
    AttributionExpired(String),
    /// Conversion idempotence violation (same link + order already recorded)
    Duplicate(String),
    /// Payout amount exceeds the influencer's available balance
    InsufficientBalance(String),
    /// Concurrent update race lost (payout attachment, status transition)
    Conflict(String),
    /// External payment provider errors
    ExternalService(String),
    /// Configuration errors (unresolvable commission rate, bad settings)
    Config(String),
    /// Internal server errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(err) => write!(f, "Database error: {}", err),
            AppError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {}", msg),
            AppError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::AttributionExpired(msg) => write!(f, "Attribution expired: {}", msg),
            AppError::Duplicate(msg) => write!(f, "Duplicate: {}", msg),
            AppError::InsufficientBalance(msg) => write!(f, "Insufficient balance: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ExternalService(msg) => write!(f, "External service error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts application errors to proper HTTP responses with status codes
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = match &self {
            AppError::Database(_) => {
                error!("Database error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string(), "DATABASE_ERROR")
            }
            AppError::StorageUnavailable(_) => {
                error!("Storage unavailable: {}", self);
                (StatusCode::SERVICE_UNAVAILABLE, "Storage temporarily unavailable".to_string(), "STORAGE_UNAVAILABLE")
            }
            AppError::Auth(msg) => {
                (StatusCode::UNAUTHORIZED, msg.clone(), "AUTH_ERROR")
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "VALIDATION_ERROR")
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, msg.clone(), "NOT_FOUND")
            }
            AppError::AttributionExpired(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg.clone(), "ATTRIBUTION_EXPIRED")
            }
            AppError::Duplicate(msg) => {
                (StatusCode::CONFLICT, msg.clone(), "DUPLICATE")
            }
            AppError::InsufficientBalance(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg.clone(), "INSUFFICIENT_BALANCE")
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, msg.clone(), "CONFLICT")
            }
            AppError::ExternalService(msg) => {
                error!("External service error: {}", self);
                (StatusCode::BAD_GATEWAY, msg.clone(), "EXTERNAL_SERVICE_ERROR")
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "CONFIG_ERROR")
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "INTERNAL_ERROR")
            }
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": error_message
            },
            "timestamp": chrono::Utc::now()
        }));

        (status, body).into_response()
    }
}

/// Convenient result type for all application operations
pub type AppResult<T> = Result<T, AppError>;

/// Distinguishes transient connection-level failures from query errors
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

/// Converts generic anyhow errors to application errors, classifying
/// transient storage failures wherever they sit in the cause chain
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let transient = err
            .chain()
            .any(|cause| cause.downcast_ref::<sqlx::Error>().map_or(false, is_transient));
        if transient {
            AppError::StorageUnavailable(format!("{}", err))
        } else {
            AppError::Database(err)
        }
    }
}

/// Converts database errors to application errors
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient(&err) {
            AppError::StorageUnavailable(err.to_string())
        } else {
            AppError::Database(anyhow::Error::from(err))
        }
    }
}

/// Converts JSON serialization errors to application errors
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

/// Converts HTTP client errors to application errors
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalService(format!("HTTP request error: {}", err))
    }
}

/// Converts authentication errors to application errors
impl From<crate::auth::AuthError> for AppError {
    fn from(err: crate::auth::AuthError) -> Self {
        AppError::Auth(err.to_string())
    }
}

/// Convenient macro for creating authentication errors
#[macro_export]
macro_rules! auth_error {
    ($msg:expr) => {
        $crate::error::AppError::Auth($msg.to_string())
    };
}

/// Convenient macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::error::AppError::Validation($msg.to_string())
    };
}

/// Convenient macro for creating not found errors
#[macro_export]
macro_rules! not_found_error {
    ($msg:expr) => {
        $crate::error::AppError::NotFound($msg.to_string())
    };
}

/// Convenient macro for creating conflict errors
#[macro_export]
macro_rules! conflict_error {
    ($msg:expr) => {
        $crate::error::AppError::Conflict($msg.to_string())
    };
}

/// Convenient macro for creating internal server errors
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::AppError::Internal($msg.to_string())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_sqlx_errors_map_to_storage_unavailable() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, AppError::StorageUnavailable(_)));

        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Database(_)));
    }

    #[test]
    fn transient_errors_survive_anyhow_context() {
        use anyhow::Context;
        let wrapped: anyhow::Result<()> = Err(sqlx::Error::PoolClosed).context("Failed to load link");
        assert!(matches!(
            AppError::from(wrapped.unwrap_err()),
            AppError::StorageUnavailable(_)
        ));
    }
}
