//! RTSP to WebSocket live video relay
//!
//! Each named stream is transcoded by an external `ffmpeg` process into a
//! browser-playable format (MPEG-TS with MPEG-1 video by default, suitable
//! for JSMpeg) and relayed to every WebSocket viewer of that stream as
//! binary messages. A stream's transcoder runs only while the stream has
//! viewers.
//!
//! ```no_run
//! use rtsp_ws_relay::{
//!     FfmpegTranscoder, ManagerConfig, RelayServer, ServerConfig, SessionConfig, SessionManager,
//! };
//!
//! # async fn example() -> rtsp_ws_relay::Result<()> {
//! let manager = SessionManager::new(FfmpegTranscoder::default(), ManagerConfig::default());
//! manager
//!     .register_stream(SessionConfig::new("lobby", "rtsp://10.0.0.5:554/stream1"))
//!     .await;
//!
//! let server = RelayServer::new(ServerConfig::default().default_stream("lobby"), manager);
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;
pub mod transcode;

pub use config::FileConfig;
pub use error::{Error, Result};
pub use registry::{CloseReason, ViewerMessage, ViewerReceiver, ViewerRegistry, ViewerSink};
pub use relay::{jsmpeg_header, FrameRelay};
pub use server::{RelayServer, ServerConfig};
pub use session::{
    ManagerConfig, RetryPolicy, SessionConfig, SessionError, SessionEvent, SessionManager,
    SessionState, SessionStatus, StreamSummary,
};
pub use stats::RelayStats;
pub use transcode::{
    FfmpegConfig, FfmpegTranscoder, ProcessEvent, ProcessExit, ProcessHandle, Resolution,
    SpawnError, TranscodeOptions, Transcoder,
};
