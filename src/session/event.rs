//! Session events
//!
//! Everything observers may want to react to is published as a
//! [`SessionEvent`] on the manager's broadcast channel. Dropping the
//! receiver unsubscribes.

use std::time::Duration;

use super::state::SessionState;

/// Event published by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged { stream: String, state: SessionState },

    /// A transcoder process was started
    ProcessStarted {
        stream: String,
        pid: Option<u32>,
        attempt: u32,
    },

    /// A transcoded chunk was relayed
    ChunkRelayed {
        stream: String,
        bytes: usize,
        viewers: usize,
    },

    /// The transcoder crashed; `restart_in` is `None` when no retry follows
    ProcessFailed {
        stream: String,
        error: String,
        restart_in: Option<Duration>,
    },

    /// The transcoder could not be started at all
    SpawnFailed { stream: String, error: String },

    /// The session gave up; all viewers were closed
    PermanentFailure { stream: String, error: String },
}

impl SessionEvent {
    /// Stream the event belongs to
    pub fn stream(&self) -> &str {
        match self {
            SessionEvent::StateChanged { stream, .. }
            | SessionEvent::ProcessStarted { stream, .. }
            | SessionEvent::ChunkRelayed { stream, .. }
            | SessionEvent::ProcessFailed { stream, .. }
            | SessionEvent::SpawnFailed { stream, .. }
            | SessionEvent::PermanentFailure { stream, .. } => stream,
        }
    }
}
