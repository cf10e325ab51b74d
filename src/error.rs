//! Pipehub error abstractions.

// Error messages.
pub const ERR_ITER_FAILURE: &str = "error returned during key/value iteration from database";
pub const ERR_DB_FLUSH: &str = "error flushing database state";

/// Errors surfaced to management callers.
///
/// Data-path faults (transport errors, engine failures, endpoint write errors) are
/// counted and logged by the processing loop and never appear here.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// A missing or invalid configuration parameter, or an unregistered kind.
    #[error("configuration error: {0}")]
    Config(String),
    /// A referenced listener, endpoint, profile or pipe does not exist.
    #[error("{kind} with uid : {uid} not found")]
    NotFound { kind: String, uid: String },
}

impl AppError {
    /// Create a new configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new not-found error naming the missing reference.
    pub fn not_found(kind: impl Into<String>, uid: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            uid: uid.into(),
        }
    }
}

/// The error type used to indicate that a system shutdown is required.
#[derive(Debug, thiserror::Error)]
#[error("fatal error: {0}")]
pub struct ShutdownError(#[from] pub anyhow::Error);

/// A result type where the error is a `ShutdownError`.
pub type ShutdownResult<T> = ::std::result::Result<T, ShutdownError>;
