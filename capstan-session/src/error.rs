//! Error types for session operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session cannot be turned into bytes, or the store is disabled.
    ///
    /// The only failure `save` surfaces by contract; every read path
    /// degrades to an empty result instead of erroring.
    #[error("Session not serializable: {0}")]
    NotSerializable(String),

    /// Codec failure while encoding or decoding a payload.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Redis-level failure.
    #[error("Redis error: {0}")]
    Redis(#[from] capstan_redis::RedisError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<redis::RedisError> for SessionError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.into())
    }
}
