//! Centralized error types for the Sonorium core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! Audio generation never surfaces these: a channel with work to do keeps
//! running and substitutes silence. Control operations return them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::audio::decoder::DecodeError;
use crate::audio::mp3::Mp3Error;

/// Application-wide error type for the Sonorium core.
#[derive(Debug, Error)]
pub enum SonoriumError {
    /// Audio file missing, unreadable, or undecodable.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Could not write theme metadata or the persistent state file.
    /// The in-memory mutation has already succeeded.
    #[error("Persistence failed: {0}")]
    Persist(String),

    /// Session cap reached.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Unknown theme, session, channel, or preset.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A network speaker did not respond within its timeout.
    #[error("Speaker unavailable: {0}")]
    Unavailable(String),

    /// Operation invalid in the current state (e.g. playing with no theme).
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SonoriumError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "io_decode",
            Self::Persist(_) => "io_persist",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::StateConflict(_) => "state_conflict",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::LimitExceeded(_) | Self::StateConflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Decode(_) | Self::Persist(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type SonoriumResult<T> = Result<T, SonoriumError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for SonoriumError {
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

impl From<DecodeError> for SonoriumError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<Mp3Error> for SonoriumError {
    fn from(err: Mp3Error) -> Self {
        Self::Internal(err.to_string())
    }
}
