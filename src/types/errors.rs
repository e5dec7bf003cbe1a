//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the relay.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (map to INVALID_ARGUMENT).
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller lacks the role a command requires (map to PERMISSION_DENIED).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found (map to NOT_FOUND).
    #[error("not found: {0}")]
    NotFound(String),

    /// Admission budget used up (map to RESOURCE_EXHAUSTED).
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Pipeline switched off (map to FAILED_PRECONDITION).
    #[error("disabled: {0}")]
    Disabled(String),

    /// Backend reported a failure or an unusable answer (map to UNAVAILABLE).
    #[error("backend error: {0}")]
    Backend(String),

    /// Backend answered with the prompt it was given.
    #[error("backend echoed the prompt back")]
    EchoedPrompt,

    /// Timeout (map to DEADLINE_EXCEEDED).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal errors (map to INTERNAL).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport errors from the backend client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code used on the IPC wire.
    pub fn to_ipc_error_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::Unauthorized(_) => "PERMISSION_DENIED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::CapacityExhausted(_) => "RESOURCE_EXHAUSTED",
            Error::Disabled(_) => "FAILED_PRECONDITION",
            Error::Backend(_) | Error::EchoedPrompt | Error::Http(_) => "UNAVAILABLE",
            Error::Timeout(_) => "DEADLINE_EXCEEDED",
            Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => "INTERNAL",
        }
    }

    /// Errors that belong to a single backend call and are absorbed by the
    /// drain loop instead of propagating.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Error::Backend(_) | Error::EchoedPrompt | Error::Timeout(_) | Error::Http(_)
        )
    }

    /// Message shown to the chat user. Admission denials carry their
    /// user-facing text verbatim; everything else uses the Display form.
    pub fn user_message(&self) -> String {
        match self {
            Error::CapacityExhausted(msg) | Error::Disabled(msg) | Error::Unauthorized(msg) => {
                msg.clone()
            }
            other => other.to_string(),
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn capacity_exhausted(msg: impl Into<String>) -> Self {
        Self::CapacityExhausted(msg.into())
    }

    pub fn disabled(msg: impl Into<String>) -> Self {
        Self::Disabled(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
