use std::time::Duration;
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed input that cannot be parsed (bad encoding, truncated data).
    #[error("Format error: {0}")]
    Format(String),

    /// An authentication error.
    ///
    /// Deliberately carries no detail: a wrong password and a tampered
    /// ciphertext must be indistinguishable to the caller.
    #[error("Authentication failed: cannot decrypt credential")]
    Authentication,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// The session exists but its TTL has elapsed.
    #[error("Session expired")]
    Expired,

    /// An authorization error.
    #[error("Forbidden")]
    Forbidden,

    /// The generation service answered with a non-success response or a
    /// payload we could not interpret.
    #[error("External service error ({code}): {message}")]
    External {
        /// HTTP status of the upstream response, when there was one.
        status: Option<u16>,
        /// Upstream or synthesized error code.
        code: String,
        /// Human readable message.
        message: String,
    },

    /// The generation job reached the `Failed` terminal status.
    #[error("Generation {request_id} failed ({code}): {message}")]
    JobFailed {
        request_id: String,
        code: String,
        message: String,
    },

    /// The generation job reached the `Cancelled` terminal status.
    #[error("Generation {request_id} was cancelled")]
    JobCancelled { request_id: String },

    /// The polling deadline elapsed before the job reached a terminal status.
    #[error("Generation {request_id} timed out after {waited:?}")]
    Timeout { request_id: String, waited: Duration },

    /// The caller aborted the operation.
    #[error("Operation aborted")]
    Aborted,

    /// An HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Builds an `External` error without an HTTP status.
    pub fn external(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::External {
            status: None,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns a stable, machine readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::Format(_) => "validation_error",
            AppError::Authentication => "authentication_error",
            AppError::NotFound => "not_found",
            AppError::Expired => "session_expired",
            AppError::Forbidden => "authorization_error",
            AppError::External { .. } | AppError::Http(_) => "external_error",
            AppError::JobFailed { .. } => "generation_failed",
            AppError::JobCancelled { .. } => "generation_cancelled",
            AppError::Timeout { .. } => "timeout",
            AppError::Aborted => "aborted",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller may reasonably retry the same operation.
    ///
    /// Only a polling timeout qualifies; submissions are never retried
    /// implicitly because they are billed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }

    /// Logs the error at a level matching its severity.
    pub fn log(&self) {
        match self {
            AppError::Validation(msg) | AppError::Format(msg) => {
                tracing::debug!("Validation error: {}", msg);
            }
            AppError::Authentication => {
                tracing::warn!("Authentication failed");
            }
            AppError::NotFound | AppError::Expired => {
                tracing::debug!("Session lookup failed: {}", self);
            }
            AppError::Forbidden => {
                tracing::warn!("Authorization failed");
            }
            AppError::External { .. } | AppError::Http(_) => {
                tracing::error!("External service error: {}", self);
            }
            AppError::JobFailed { .. } | AppError::JobCancelled { .. } => {
                tracing::warn!("{}", self);
            }
            AppError::Timeout { .. } | AppError::Aborted => {
                tracing::warn!("{}", self);
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
            }
        }
    }
}
