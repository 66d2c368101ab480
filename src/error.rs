//! Error types for codeforge operations.
//!
//! Defines the error taxonomy shared by the pipeline subsystems:
//! - Model backend calls (quota, transport, deadline, remote API errors)
//! - Pipeline stages (input validation, extraction, testing, packaging)
//! - Artifact storage

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Machine-readable classification of a [`ModelError`].
///
/// Retry decisions switch on this code rather than inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    RateLimitExceeded,
    ServiceUnavailable,
    DeadlineExceeded,
    InternalError,
    InvalidRequest,
    InvalidResponse,
    Configuration,
}

impl ErrorCode {
    /// Returns the wire identifier of this code (e.g. `RATE_LIMIT_EXCEEDED`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidResponse => "INVALID_RESPONSE",
            ErrorCode::Configuration => "CONFIGURATION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codes retried by the default retry predicate.
pub const DEFAULT_RETRYABLE_CODES: [ErrorCode; 4] = [
    ErrorCode::RateLimitExceeded,
    ErrorCode::ServiceUnavailable,
    ErrorCode::DeadlineExceeded,
    ErrorCode::InternalError,
];

/// Errors that can occur while invoking a generative model.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The local rate limiter denied admission.
    #[error("Rate limit exceeded. Retry after {}ms", wait.as_millis())]
    RateLimitExceeded { wait: Duration },

    /// The remote service answered with HTTP 429.
    #[error("Remote quota exhausted: {0}")]
    Throttled(String),

    /// The call did not complete before the per-call deadline.
    #[error("Model request timeout after {}ms", timeout.as_millis())]
    DeadlineExceeded { timeout: Duration },

    /// Connection failure or 502/503/504 from the remote service.
    #[error("Model service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Remote 500 or an unexpected client-side failure.
    #[error("Internal model error: {0}")]
    Internal(String),

    /// Non-retryable API error (4xx other than 429).
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The remote response could not be interpreted.
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    /// The backend is misconfigured (missing key, bad URL, ...).
    #[error("Backend configuration error: {0}")]
    Configuration(String),
}

impl ModelError {
    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ModelError::RateLimitExceeded { .. } | ModelError::Throttled(_) => {
                ErrorCode::RateLimitExceeded
            }
            ModelError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            ModelError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            ModelError::Internal(_) => ErrorCode::InternalError,
            ModelError::Api { .. } => ErrorCode::InvalidRequest,
            ModelError::InvalidResponse(_) => ErrorCode::InvalidResponse,
            ModelError::Configuration(_) => ErrorCode::Configuration,
        }
    }

    /// Whether the default retry predicate would retry this error.
    pub fn is_retryable(&self) -> bool {
        DEFAULT_RETRYABLE_CODES.contains(&self.code())
    }

    /// Suggested wait before retrying, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimitExceeded { wait } => Some(*wait),
            _ => None,
        }
    }
}

/// Errors that can occur during artifact storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create storage directory: {0}")]
    DirectoryCreationFailed(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by pipeline stages.
///
/// Fatal stages propagate these to the runner; soft stages only record them.
#[derive(Debug, Error)]
pub enum StageError {
    /// Malformed input caught at preprocessing.
    #[error("{0}")]
    InvalidInput(String),

    /// Quota, transport or deadline failure from the model adapter.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// No usable code in the model output.
    #[error("{0}")]
    Extraction(String),

    #[error("Optimization failed: {0}")]
    Optimization(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The referenced test suite could not be resolved.
    #[error("Test suite error: {0}")]
    TestSuite(String),

    /// The suite ran but reported failures.
    #[error("{failed} of {total} tests failed")]
    TestsFailed { failed: u32, total: u32 },

    #[error("Artifact storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_retry_allow_list() {
        assert!(ModelError::RateLimitExceeded {
            wait: Duration::from_millis(5)
        }
        .is_retryable());
        assert!(ModelError::Throttled("slow down".into()).is_retryable());
        assert!(ModelError::DeadlineExceeded {
            timeout: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ModelError::ServiceUnavailable("down".into()).is_retryable());
        assert!(ModelError::Internal("boom".into()).is_retryable());

        assert!(!ModelError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!ModelError::InvalidResponse("garbage".into()).is_retryable());
        assert!(!ModelError::Configuration("no key".into()).is_retryable());
    }

    #[test]
    fn test_rate_limit_error_carries_wait() {
        let err = ModelError::RateLimitExceeded {
            wait: Duration::from_millis(1500),
        };
        assert_eq!(err.code().as_str(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
        assert_eq!(err.to_string(), "Rate limit exceeded. Retry after 1500ms");
        assert_eq!(ModelError::Internal("x".into()).retry_after(), None);
    }

    #[test]
    fn test_stage_error_wraps_model_error_transparently() {
        let err: StageError = ModelError::ServiceUnavailable("connection refused".into()).into();
        assert_eq!(
            err.to_string(),
            "Model service unavailable: connection refused"
        );
    }
}
