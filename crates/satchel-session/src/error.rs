//! Error types for session operations.

use crate::cache::CacheError;

/// Errors that can occur while managing sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A create was attempted on a key that already has a record.
    ///
    /// `Session::create` retries with a fresh key when it sees this.
    #[error("Session key already exists")]
    AlreadyExists,

    /// An update was attempted on a key that has no record.
    #[error("Session record does not exist")]
    DoesNotExist,

    /// The key is malformed or unsafe for the backend (e.g. path traversal).
    #[error("Invalid session key: {0}")]
    InvalidKey(String),

    /// Stored data failed signature verification or decoding.
    #[error("Session data corrupted: {0}")]
    Corrupted(String),

    /// The backend does not implement the operation.
    #[error("Operation not supported by {0}")]
    Unsupported(&'static str),

    /// The bounded create loop ran out of attempts.
    #[error("Unable to create a new session key after {0} attempts")]
    CreateExhausted(usize),

    /// Removing an attribute that is not present.
    #[error("Session attribute not found: {0}")]
    AttributeNotFound(String),

    /// Store construction was given unusable settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Cache used as primary storage failed.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<satchel_config::ConfigError> for SessionError {
    fn from(err: satchel_config::ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
