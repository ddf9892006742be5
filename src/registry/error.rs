//! Registry error types

use super::viewer::ViewerId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A viewer with this ID is already subscribed to the stream
    #[error("viewer {viewer_id} already subscribed to {stream}")]
    DuplicateViewer { stream: String, viewer_id: ViewerId },

    /// The connection closed before it could be registered
    #[error("viewer connection closed before subscribing to {0}")]
    ConnectionClosed(String),
}
