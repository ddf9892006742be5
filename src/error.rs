//! Crate-level error type
//!
//! Each component has its own error enum; this type unifies them for
//! callers that drive the whole relay (the server and the binary).

use crate::registry::RegistryError;
use crate::session::SessionError;
use crate::transcode::SpawnError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for relay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transcoder could not be started
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Viewer registry rejected an operation
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Session controller rejected an operation
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Configuration file could not be parsed
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
