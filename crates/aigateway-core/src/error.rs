//! Error taxonomy unified at the gRPC boundary.

use thiserror::Error;

/// Per-request errors surfaced from a processor operation.
///
/// The Stream Server converts any of these (except [`ProcessorError::Cancelled`] and
/// [`ProcessorError::Eof`], which are normal termination, not failure) into a
/// `tonic::Status::unknown` carrying the error's `Display` text, and records exactly one
/// `RecordRequestCompletion(success=false)`.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("failed to parse request body: {0}")]
    RequestParseError(String),

    #[error("unsupported backend schema: {0}")]
    UnsupportedSchema(String),

    #[error("translation failed: {0}")]
    TranslationError(String),

    #[error("auth handler failed: {0}")]
    AuthError(String),

    #[error("failed to decode response body: {0}")]
    DecodeError(String),

    #[error("cel evaluation failed: {0}")]
    CelError(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariantError(String),

    #[error("no endpoint registered for path {0}")]
    NotFound(String),

    #[error("stream cancelled")]
    Cancelled,

    #[error("stream ended")]
    Eof,
}

impl ProcessorError {
    /// Whether this error represents normal stream termination (not a request failure).
    pub fn is_terminal_ok(&self) -> bool {
        matches!(self, ProcessorError::Cancelled | ProcessorError::Eof)
    }
}

impl From<&ProcessorError> for tonic::Status {
    fn from(err: &ProcessorError) -> Self {
        tonic::Status::unknown(err.to_string())
    }
}

impl From<ProcessorError> for tonic::Status {
    fn from(err: ProcessorError) -> Self {
        tonic::Status::unknown(err.to_string())
    }
}
