//! Centralized error types for the relaycast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines a closed set of tagged error variants using `thiserror`
//! - Groups variants into the error *kinds* from the design (input_invalid,
//!   external_unavailable, external_rejected, resource_exhausted,
//!   state_conflict, internal)
//! - Maps errors to HTTP status codes and implements `IntoResponse` for the
//!   command surface

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide a machine-readable error code.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// One of the six error kinds enumerated in the error-handling design.
///
/// Kinds describe *how the system should react*, independent of the
/// specific variant: whether a caller can retry, whether the job engine
/// should retry, and what HTTP status maps to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputInvalid,
    ExternalUnavailable,
    ExternalRejected,
    ResourceExhausted,
    StateConflict,
    Internal,
}

/// Application-wide error type for relaycast.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum RelayError {
    /// Identifier failed the syntactic check (fixed-length opaque string).
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A request field failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Extractor or transcoder process failed to spawn or exited abnormally
    /// before any bytes were produced.
    #[error("extractor/transcoder unavailable: {0}")]
    ExtractorUnavailable(String),

    /// A transcription/summarization/note-store provider call failed for a
    /// transient reason (network error, 5xx, timeout, 429).
    #[error("external provider unavailable: {0}")]
    ExternalUnavailable(String),

    /// A provider call failed for a non-retriable reason (4xx other than 429,
    /// malformed response).
    #[error("external provider rejected the request: {0}")]
    ExternalRejected(String),

    /// Requested stream does not exist (already closed or never created).
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Requested queue entry does not exist.
    #[error("queue entry not found: {0}")]
    EntryNotFound(String),

    /// `reorder_queue` was given a set of ids that does not match the
    /// current queue contents.
    #[error("reorder set mismatch")]
    ReorderSetMismatch,

    /// A subscription's bounded queue overflowed; handled internally by the
    /// drop-oldest policy, but surfaced here for logging/metrics call sites.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A requested state transition is forbidden given current state
    /// (e.g. `enqueue_item` while a non-terminal job already exists).
    #[error("already in progress: {0}")]
    AlreadyInProgress(String),

    /// Persistence (sqlite) failure.
    #[error("store error: {0}")]
    Store(String),

    /// Filesystem failure (capture file, cache file, backup sink).
    #[error("filesystem error: {0}")]
    Io(String),

    /// Programmer error / unexpected panic, caught at a task boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the error kind this variant belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier(_) | Self::InvalidRequest(_) => ErrorKind::InputInvalid,
            Self::ExtractorUnavailable(_) | Self::ExternalUnavailable(_) => {
                ErrorKind::ExternalUnavailable
            }
            Self::ExternalRejected(_) => ErrorKind::ExternalRejected,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::StreamNotFound(_)
            | Self::EntryNotFound(_)
            | Self::ReorderSetMismatch
            | Self::AlreadyInProgress(_) => ErrorKind::StateConflict,
            Self::Store(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns whether a caller (job engine retry loop) should retry this
    /// error. 429 is folded into `ExternalUnavailable` by callers before
    /// this is consulted, per the retriable-vs-non-retriable distinction.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ExternalUnavailable | ErrorKind::ResourceExhausted
        )
    }
}

impl ErrorCode for RelayError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ExtractorUnavailable(_) => "extractor_unavailable",
            Self::ExternalUnavailable(_) => "external_unavailable",
            Self::ExternalRejected(_) => "external_rejected",
            Self::StreamNotFound(_) => "stream_not_found",
            Self::EntryNotFound(_) => "entry_not_found",
            Self::ReorderSetMismatch => "reorder_set_mismatch",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::AlreadyInProgress(_) => "already_in_progress",
            Self::Store(_) => "store_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl RelayError {
    /// Maps the error to an appropriate HTTP status code for the command surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier(_) | Self::InvalidRequest(_) | Self::ReorderSetMismatch => {
                StatusCode::BAD_REQUEST
            }
            Self::StreamNotFound(_) | Self::EntryNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyInProgress(_) => StatusCode::CONFLICT,
            Self::ExternalRejected(_) => StatusCode::BAD_GATEWAY,
            Self::ExtractorUnavailable(_) | Self::ExternalUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Store(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for RelayError {
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

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<crate::utils::IdentifierError> for RelayError {
    fn from(err: crate::utils::IdentifierError) -> Self {
        Self::InvalidIdentifier(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::ExternalUnavailable(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 || status.is_server_error() {
                Self::ExternalUnavailable(err.to_string())
            } else {
                Self::ExternalRejected(err.to_string())
            }
        } else {
            Self::ExternalUnavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_is_input_invalid_and_not_transient() {
        let err = RelayError::InvalidIdentifier("bad".into());
        assert_eq!(err.kind(), ErrorKind::InputInvalid);
        assert_eq!(err.code(), "invalid_identifier");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_transient());
    }

    #[test]
    fn external_unavailable_is_transient() {
        let err = RelayError::ExternalUnavailable("timeout".into());
        assert!(err.is_transient());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn external_rejected_is_not_transient() {
        let err = RelayError::ExternalRejected("400".into());
        assert!(!err.is_transient());
        assert_eq!(err.kind(), ErrorKind::ExternalRejected);
    }

    #[test]
    fn already_in_progress_maps_to_conflict() {
        let err = RelayError::AlreadyInProgress("transcribing".into());
        assert_eq!(err.code(), "already_in_progress");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
