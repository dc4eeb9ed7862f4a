//! Centralized error types for the jukebox core library.
//!
//! This module provides a unified error handling system that:
//! - Gives every domain error a machine-readable code
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::provider::ProviderError;
use crate::services::queue_service::QueueError;
use crate::services::reconciler::ReconcileError;
use crate::services::vote_manager::VoteError;
use crate::store::StoreError;
use crate::utils::TrackUriError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for ProviderError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "provider_unreachable",
            Self::AuthExpired | Self::TokenRefresh(_) => "provider_auth_failed",
            Self::RateLimited { .. } => "provider_rate_limited",
            Self::NoActiveDevice => "no_active_device",
            Self::NotFound(_) => "track_not_found",
            Self::HttpStatus(_, _) => "provider_error_status",
            Self::Parse(_) => "provider_parse_error",
            Self::Timeout => "provider_timeout",
        }
    }
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "database_error",
            Self::Task(_) => "store_task_failed",
            Self::Io(_) => "store_io_error",
        }
    }
}

impl ErrorCode for VoteError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyActive => "vote_already_active",
            Self::NotEnoughUsers { .. } => "not_enough_users",
            Self::AlreadyBanned => "already_banned",
            Self::NotFound => "vote_not_found",
            Self::AlreadyVoted => "already_voted",
            Self::Store(e) => e.code(),
        }
    }
}

impl ErrorCode for ReconcileError {
    fn code(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.code(),
            Self::Store(e) => e.code(),
        }
    }
}

impl ErrorCode for QueueError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidUri(_) => "invalid_track_uri",
            Self::Banned => "track_banned",
            Self::NothingPlaying => "nothing_playing",
            Self::StaleSkip { .. } => "stale_skip",
            Self::UnknownInstance(_) => "queue_entry_not_found",
            Self::EmptyQuery => "missing_query",
            Self::Provider(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Sync(e) => e.code(),
        }
    }
}

/// Application-wide error type for the jukebox server.
///
/// Carries the originating domain code so API clients see the precise
/// reason while the variant decides the HTTP status.
#[derive(Debug, Error)]
pub enum JukeboxError {
    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {message}")]
    InvalidRequest { code: &'static str, message: String },

    /// Request was well-formed but cannot be honored right now.
    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    /// Requested resource does not exist.
    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    /// The request must carry a captured payment first.
    #[error("Payment required")]
    PaymentRequired,

    /// The streaming provider failed or is unreachable.
    #[error("Provider error: {message}")]
    Provider { code: &'static str, message: String },

    /// Internal server error.
    #[error("Internal error: {message}")]
    Internal { code: &'static str, message: String },

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl JukeboxError {
    /// Shorthand for a generic invalid request.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            code: "invalid_request",
            message: message.into(),
        }
    }

    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { code, .. }
            | Self::Conflict { code, .. }
            | Self::NotFound { code, .. }
            | Self::Provider { code, .. }
            | Self::Internal { code, .. } => *code,
            Self::PaymentRequired => "payment_required",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PaymentRequired => StatusCode::FORBIDDEN,
            Self::Provider { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::provider::ProviderResult;
pub use crate::store::StoreResult;

/// Convenient Result alias for application-wide operations.
pub type JukeboxResult<T> = Result<T, JukeboxError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for JukeboxError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversions
// ─────────────────────────────────────────────────────────────────────────────

impl From<ProviderError> for JukeboxError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(_) => Self::NotFound {
                code: err.code(),
                message: err.to_string(),
            },
            ProviderError::NoActiveDevice => Self::Conflict {
                code: err.code(),
                message: err.to_string(),
            },
            _ => Self::Provider {
                code: err.code(),
                message: err.to_string(),
            },
        }
    }
}

impl From<StoreError> for JukeboxError {
    fn from(err: StoreError) -> Self {
        Self::Internal {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<TrackUriError> for JukeboxError {
    fn from(err: TrackUriError) -> Self {
        Self::InvalidRequest {
            code: "invalid_track_uri",
            message: err.to_string(),
        }
    }
}

impl From<ReconcileError> for JukeboxError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Provider(e) => e.into(),
            ReconcileError::Store(e) => e.into(),
        }
    }
}

impl From<VoteError> for JukeboxError {
    fn from(err: VoteError) -> Self {
        match err {
            VoteError::Store(e) => e.into(),
            VoteError::NotFound => Self::NotFound {
                code: err.code(),
                message: err.to_string(),
            },
            _ => Self::Conflict {
                code: err.code(),
                message: err.to_string(),
            },
        }
    }
}

impl From<QueueError> for JukeboxError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidUri(e) => e.into(),
            QueueError::Provider(e) => e.into(),
            QueueError::Store(e) => e.into(),
            QueueError::Sync(e) => e.into(),
            QueueError::EmptyQuery => Self::InvalidRequest {
                code: err.code(),
                message: err.to_string(),
            },
            QueueError::UnknownInstance(_) => Self::NotFound {
                code: err.code(),
                message: err.to_string(),
            },
            QueueError::Banned | QueueError::NothingPlaying | QueueError::StaleSkip { .. } => {
                Self::Conflict {
                    code: err.code(),
                    message: err.to_string(),
                }
            }
        }
    }
}
