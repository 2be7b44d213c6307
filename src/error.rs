//! Error types for kvodm.

use thiserror::Error as ThisError;

/// The result type used throughout kvodm.
pub type Result<T> = std::result::Result<T, Error>;

/// Message the backend answers with when a script hash is not cached.
pub const NOSCRIPT_MESSAGE: &str = "NOSCRIPT No matching script. Please use EVAL.";

/// The error type for kvodm operations.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// A script, model or instance was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend script cache does not hold the requested hash.
    #[error("{0}")]
    NoScript(String),

    /// A session was requested across models living on different backends.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The backend rejected a command or a script failed remotely.
    #[error("{0}")]
    Response(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates the error a backend returns for an uncached script hash.
    pub fn no_script() -> Self {
        Error::NoScript(NOSCRIPT_MESSAGE.to_string())
    }

    /// Creates a new invalid transaction error.
    pub fn invalid_transaction(msg: impl Into<String>) -> Self {
        Error::InvalidTransaction(msg.into())
    }

    /// Creates a new backend response error.
    pub fn response(msg: impl Into<String>) -> Self {
        Error::Response(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Returns true if this is the "unknown script hash" condition.
    pub fn is_no_script(&self) -> bool {
        matches!(self, Error::NoScript(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
