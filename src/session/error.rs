//! Session error types

use crate::registry::RegistryError;

/// Error type for session operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// No session or catalog entry exists for the stream
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// A session with this name is already running
    #[error("stream already exists: {0}")]
    AlreadyExists(String),

    /// The session failed permanently and accepts no viewers
    #[error("stream {stream} failed: {reason}")]
    StreamFailed { stream: String, reason: String },

    /// The session task is gone
    #[error("session for {0} is not running")]
    SessionGone(String),

    /// The viewer could not be registered
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
