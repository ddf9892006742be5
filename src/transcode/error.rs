//! Transcoder spawn errors

/// Error returned when a transcoder process cannot be started
///
/// Spawn errors are configuration problems; the session controller does not
/// retry them.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The transcoder executable could not be found
    #[error("transcoder binary not found: {binary}")]
    BinaryNotFound { binary: String },

    /// The source URL is malformed or unsupported
    #[error("invalid source URL {url:?}: {reason}")]
    InvalidSource { url: String, reason: String },

    /// The transcode options would produce an invalid invocation
    #[error("invalid transcode options: {0}")]
    InvalidOptions(String),

    /// Spawning failed for another OS-level reason
    #[error("failed to spawn transcoder: {0}")]
    Io(#[from] std::io::Error),
}
