//! Typed error handling for the notification core
//!
//! Errors are handled at the smallest scope that can absorb them: a bad frame
//! ends one connection, a failed lookup skips one event, a failed send skips
//! one subscriber. [`NotifyError`] carries enough information for the protocol
//! handler to pick the close status a client can interpret.
//!
//! # Error Categories
//!
//! - [`NotifyError::InvalidArgument`]: empty identifiers and similar caller errors
//! - [`NotifyError::InvalidFilter`]: a subscription filter failed validation
//! - [`NotifyError::Protocol`]: malformed frames or messages sent out of order
//! - [`NotifyError::Authentication`]: a bearer token could not be resolved
//! - [`NotifyError::Config`]: invalid configuration values
//! - [`NotifyError::Internal`]: collaborator faults and anything unexpected

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Main error type for the notification core
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A required identifier was empty or otherwise unusable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A subscription filter was rejected before being stored
    #[error("invalid subscription filter: {0}")]
    InvalidFilter(#[from] FilterError),

    /// The client broke the message protocol
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The supplied access token did not resolve to a user
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Configuration could not be used as given
    #[error("configuration error: {0}")]
    Config(String),

    /// Collaborator failure or unexpected internal fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl NotifyError {
    /// Machine-readable error code, used in logs
    pub fn error_code(&self) -> &'static str {
        match self {
            NotifyError::InvalidArgument(_) => "INVALID_ARGUMENT",
            NotifyError::InvalidFilter(_) => "INVALID_FILTER",
            NotifyError::Protocol(_) => "PROTOCOL_ERROR",
            NotifyError::Authentication(_) => "AUTHENTICATION_FAILED",
            NotifyError::Config(_) => "CONFIG_ERROR",
            NotifyError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for the REST exposure
    pub fn status_code(&self) -> StatusCode {
        match self {
            NotifyError::InvalidArgument(_)
            | NotifyError::InvalidFilter(_)
            | NotifyError::Protocol(_) => StatusCode::BAD_REQUEST,
            NotifyError::Authentication(_) => StatusCode::UNAUTHORIZED,
            NotifyError::Config(_) | NotifyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.error_code(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

impl From<anyhow::Error> for NotifyError {
    fn from(err: anyhow::Error) -> Self {
        NotifyError::Internal(format!("{:#}", err))
    }
}

/// Reasons a subscription filter is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The filter carried no clauses at all
    #[error("filter must contain at least one clause")]
    NoClauses,

    /// A clause targets a field other than the document URI
    #[error("unsupported filter field '{0}'")]
    UnsupportedField(String),

    /// A clause uses an operator other than `one_of`
    #[error("unsupported filter operator '{0}'")]
    UnsupportedOperator(String),

    /// A clause has a missing or empty value list
    #[error("filter clause on '{field}' has no values")]
    EmptyValues { field: String },

    /// A clause value is not a string
    #[error("filter clause on '{field}' contains a non-string value")]
    InvalidValue { field: String },
}

/// Convenience alias used throughout the crate
pub type NotifyResult<T> = Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_converts_into_notify_error() {
        let err: NotifyError = FilterError::UnsupportedOperator("not_one_of".to_string()).into();

        assert!(matches!(err, NotifyError::InvalidFilter(_)));
        assert_eq!(err.error_code(), "INVALID_FILTER");
        assert_eq!(
            err.to_string(),
            "invalid subscription filter: unsupported filter operator 'not_one_of'"
        );
    }

    #[test]
    fn test_anyhow_error_becomes_internal() {
        let err: NotifyError = anyhow::anyhow!("lookup timed out")
            .context("annotation store")
            .into();

        match err {
            NotifyError::Internal(msg) => {
                assert!(msg.contains("annotation store"));
                assert!(msg.contains("lookup timed out"));
            }
            other => panic!("Expected Internal, got {:?}", other),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            NotifyError::InvalidArgument("uri".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            NotifyError::Authentication("nope".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            NotifyError::Internal("boom".into())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_empty_values_message_names_field() {
        let err = FilterError::EmptyValues {
            field: "/uri".to_string(),
        };
        assert_eq!(err.to_string(), "filter clause on '/uri' has no values");
    }
}
