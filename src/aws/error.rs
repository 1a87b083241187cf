//! Error taxonomy for AWS API calls
//!
//! Every external call returns a tagged `ApiError` instead of raising the
//! transport library's error types past the client boundary. The retry layer
//! asks `is_transient()`; the mutator asks `is_not_found()` and
//! `is_unmodifiable()` to map rejections to per-role outcomes.

use thiserror::Error;

/// Error codes AWS returns for throttling or temporary service trouble.
/// These are worth retrying with backoff; everything else is terminal.
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "InternalFailure",
    "RequestTimeout",
];

/// Errors produced by the AWS API clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP request itself failed (connect error, timeout, TLS).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// AWS rejected the call with a structured error response.
    #[error("{service} returned {code}: {message}")]
    Api {
        service: &'static str,
        code: String,
        message: String,
    },

    /// The response could not be parsed into the expected shape.
    #[error("unexpected response from {service}: {detail}")]
    InvalidResponse {
        service: &'static str,
        detail: String,
    },
}

impl ApiError {
    /// The AWS error code, when the failure came from a structured response.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether a bounded-backoff retry is worthwhile.
    ///
    /// Transport failures (timeouts, resets) and throttling/5xx codes are
    /// transient; denials and missing entities are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Api { code, .. } => TRANSIENT_CODES.iter().any(|c| c == code),
            ApiError::InvalidResponse { .. } => false,
        }
    }

    /// The target role does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self.code(), Some("NoSuchEntity") | Some("NoSuchEntityException"))
    }

    /// The target is platform-managed and refuses modification.
    pub fn is_unmodifiable(&self) -> bool {
        matches!(
            self.code(),
            Some("UnmodifiableEntity") | Some("UnmodifiableEntityException")
        )
    }
}
