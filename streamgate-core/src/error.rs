use thiserror::Error;

/// Failures surfaced by the session supervisor to its callers.
///
/// Process-level problems never escape the supervisor as these errors
/// directly; they become session state transitions and reach callers only
/// as [`SessionError::NotReady`] (or [`SessionError::Spawn`] for the request
/// that triggered the failed launch).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid stream key: {0}")]
    Validation(String),

    #[error("stream not configured: {0}")]
    NotConfigured(String),

    #[error("transcoder failed to start: {0}")]
    Spawn(String),

    #[error("transcoder failed: {0}")]
    RuntimeFailure(String),

    #[error("stream {key} is not ready yet")]
    NotReady { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
