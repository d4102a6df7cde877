//! Core error taxonomy
//!
//! Callers of the core always receive either a well-typed success value or
//! one of these kinds, never a raw transport error.

use crate::domain::GatewayFailure;
use crate::persistence::PersistenceError;
use thiserror::Error;

/// Errors surfaced by the core's operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Filename is not on the configured allow-list
    #[error("Forbidden: '{filename}' is not an allowed workspace file")]
    Forbidden { filename: String },

    /// No record or file exists, locally and remotely
    #[error("Not found: {entity} '{identifier}'")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    /// Gateway call exceeded its deadline
    #[error("Gateway timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport-level connection failure
    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    /// Gateway reachable but returned failure
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Persisted-store failure
    #[error("Store error: {0}")]
    Store(#[from] PersistenceError),
}

impl CoreError {
    /// Build the matching error kind for a classified gateway failure.
    pub fn from_failure(failure: &GatewayFailure) -> Self {
        match failure {
            GatewayFailure::Timeout { timeout_ms } => Self::Timeout {
                timeout_ms: *timeout_ms,
            },
            GatewayFailure::Unreachable { message } => Self::Unreachable(message.clone()),
            GatewayFailure::Http { code, message } => {
                Self::Gateway(format!("HTTP {}: {}", code, message))
            }
            GatewayFailure::Protocol { message } => Self::Gateway(message.clone()),
        }
    }

    /// HTTP status code for API responses.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Timeout { .. } | Self::Unreachable(_) | Self::Gateway(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Store(e) => e.status_code(),
        }
    }
}
