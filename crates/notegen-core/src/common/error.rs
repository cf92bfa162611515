//! Error types for the note generation service.
//!
//! This module defines the central `Error` enum, which captures all recoverable
//! and reportable error cases within the generation server. It implements
//! [`IntoResponse`] so handlers can propagate errors with `?` and have them
//! rendered as an HTTP status plus a small JSON body.
//!
//! ## Error Cases
//! - `InvalidRequest`: The upload, parameters, MIDI payload or client id was
//!   malformed. Always raised before a session starts.
//! - `PathTraversal`: A rooted file path tried to escape its root. Rendered
//!   exactly like `NotFound` so the real layout is never revealed.
//! - `NotFound`: A rooted file path did not resolve to a file.
//! - `PayloadTooLarge`: The upload exceeded the configured body limit.
//! - `WorkerFailure`: The model call failed. Never returned from a handler;
//!   it is the typed form of a failed stream termination, and its message is
//!   the body of the optional trailing error record.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.
//! - `Io`: An unexpected filesystem failure.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the note generation service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The client request was malformed or violated a constraint.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A requested path resolved outside of its configured root.
    #[error("Path escapes its root")]
    PathTraversal,

    /// A requested path did not resolve to a servable file.
    #[error("Not found")]
    NotFound,

    /// The upload exceeded the configured body limit.
    #[error("Upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    /// The generation model raised an error or panicked.
    #[error("{reason}")]
    WorkerFailure { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Unexpected I/O failure while serving a request.
    #[error("I/O error: {context}")]
    Io { context: String },
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::PathTraversal | Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Self::WorkerFailure { .. } | Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            // Traversal attempts look exactly like missing files.
            Self::PathTraversal | Self::NotFound => Self::NotFound.to_string(),
            Self::Io { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_indistinguishable_from_not_found() {
        let traversal = Error::PathTraversal.into_response();
        let missing = Error::NotFound.into_response();
        assert_eq!(traversal.status(), StatusCode::NOT_FOUND);
        assert_eq!(traversal.status(), missing.status());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Error::invalid("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::PayloadTooLarge { limit: 8 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            Error::WorkerFailure {
                reason: "boom".into()
            }
            .to_string(),
            "boom"
        );
        assert_eq!(
            Error::ServiceShutdown.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Io {
                context: "disk".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
