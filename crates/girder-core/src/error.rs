//! Error taxonomy shared across Girder.
//!
//! Storage, coordination, and HTTP client operations never retry
//! internally; every retry loop lives at the call site so budgets stay
//! context-appropriate. The variants here are what those call sites
//! dispatch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The target object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency or ownership mismatch on update. Retryable
    /// only by re-fetching and recomputing, never by replaying the same
    /// write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network or storage fault, not distinguished further. Retry with a
    /// bounded budget and fixed delay.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Lock or coordination service unreachable at startup. Fatal to the
    /// component's initialization.
    #[error("coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    /// Malformed payload, invalid id, or unknown step type. Never
    /// retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether a bounded retry of the same operation can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientIo(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Error::Conflict(err.to_string()),
            _ => Error::TransientIo(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
