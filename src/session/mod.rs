//! Stream sessions
//!
//! A session owns one stream's transcoder. It starts the transcoder when
//! the stream gains its first viewer, stops it when the last one leaves,
//! and restarts it with backoff after a crash.
//!
//! ```text
//!             first viewer             first chunk
//!   Idle ───────────────────► Starting ───────────► Streaming
//!    ▲                           │                      │
//!    │        last viewer / stop │                      │ last viewer / stop
//!    └──────────── Stopping ◄────┴──────────────────────┘
//!                                │ crash                │ crash
//!                                ▼                      ▼
//!                              Failed ── backoff ──► Starting
//!                                │
//!                                └── limit reached: terminal
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod manager;
pub mod state;

pub use config::{ManagerConfig, RetryPolicy, SessionConfig};
pub use controller::{SessionControl, SessionHandle};
pub use error::SessionError;
pub use event::SessionEvent;
pub use manager::{SessionManager, StreamSummary};
pub use state::{SessionState, SessionStatus};
