//! Error types for tokengate.

use thiserror::Error;

use crate::executor::ExecutorError;

/// Main error type for tokengate operations.
///
/// Callers can branch on the variant: only [`TokengateError::BackendUnavailable`]
/// is ever subject to the fail strategy, everything else always surfaces.
#[derive(Error, Debug)]
pub enum TokengateError {
    /// Invalid limiter or backend configuration, or an invalid cost.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity was empty, malformed or too long.
    #[error("Identity error: {0}")]
    Identity(String),

    /// Redis could not be reached or did not answer in time.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Redis refused the script or its arguments.
    #[error("Script rejected by backend: {0}")]
    ScriptRejected(String),

    /// The script reply did not have the expected shape.
    #[error("Algorithm contract violation: {0}")]
    Contract(String),

    /// A blocking call on an async limiter, or the reverse.
    #[error("Calling convention error: {0}")]
    CallingConvention(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TokengateError {
    /// Whether this error may be absorbed by a fail-open strategy.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, TokengateError::BackendUnavailable(_))
    }
}

impl From<ExecutorError> for TokengateError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Unavailable(msg) => TokengateError::BackendUnavailable(msg),
            ExecutorError::Rejected(msg) => TokengateError::ScriptRejected(msg),
            ExecutorError::MalformedReply(msg) => TokengateError::Contract(msg),
            ExecutorError::Config(msg) => TokengateError::Config(msg),
        }
    }
}

/// Result type alias for tokengate operations.
pub type Result<T> = std::result::Result<T, TokengateError>;
