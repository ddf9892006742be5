//! Transcode process management
//!
//! This module provides:
//! - Typed transcoder options and source URL validation
//! - The [`Transcoder`] seam the session controller starts processes through
//! - An ffmpeg implementation with reliable termination
//! - stderr parsing for the output video size and crash diagnostics

pub mod error;
pub mod ffmpeg;
pub mod options;
pub mod process;
pub mod stderr;

pub use error::SpawnError;
pub use ffmpeg::{FfmpegConfig, FfmpegTranscoder};
pub use options::{parse_source, redact_source, Resolution, TranscodeOptions};
pub use process::{ProcessEvent, ProcessExit, ProcessHandle};

/// Starts transcoder processes for sessions
///
/// Implementations must fail fast with [`SpawnError`] for problems that a
/// retry cannot fix, and report everything else through the handle's events.
pub trait Transcoder: Send + Sync + 'static {
    /// Start transcoding `source_url` with `options`
    fn start(
        &self,
        source_url: &str,
        options: &TranscodeOptions,
    ) -> Result<ProcessHandle, SpawnError>;
}
