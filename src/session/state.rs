//! Session state machine
//!
//! Tracks the lifecycle of a stream session from idle through streaming and
//! back, including failure and retry.

use std::time::Instant;

use serde::Serialize;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No transcoder running
    Idle,
    /// Transcoder spawned, waiting for its first output
    Starting,
    /// Transcoder output is being relayed
    Streaming,
    /// Transcoder is being shut down
    Stopping,
    /// Transcoder failed; either waiting to retry or failed for good
    Failed,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (_, Failed) => true,
            (Idle, Starting)
            | (Starting, Streaming)
            | (Starting, Stopping)
            | (Streaming, Stopping)
            | (Stopping, Idle)
            | (Failed, Starting)
            | (Failed, Idle) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable status of a session
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// Current state
    pub state: SessionState,

    /// When the current state was entered
    pub since: Instant,

    /// Consecutive restart attempts since the last stable run
    pub restarts: u32,

    /// Whether the failure is permanent (no further retries)
    pub terminal: bool,

    /// Most recent failure description
    pub last_error: Option<String>,

    /// OS process ID of the running transcoder
    pub pid: Option<u32>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            since: Instant::now(),
            restarts: 0,
            terminal: false,
            last_error: None,
            pid: None,
        }
    }

    /// Move to `next`, returning `false` if the transition is not allowed
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state == next || !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.since = Instant::now();
        if next != SessionState::Failed {
            self.terminal = false;
        }
        true
    }

    /// Whether the session failed for good
    pub fn is_terminal(&self) -> bool {
        self.state == SessionState::Failed && self.terminal
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}
