//! ffmpeg-backed transcoder
//!
//! Spawns `ffmpeg` with stdout piped back to the relay. One task per process
//! reads stdout in bounded chunks and waits for exit; a second task drains
//! stderr for logging, size detection and the crash tail.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::error::SpawnError;
use super::options::{parse_source, TranscodeOptions};
use super::process::{ProcessEvent, ProcessExit, ProcessHandle};
use super::stderr::{LineSplitter, OutputProbe, StderrTail};
use super::Transcoder;

/// Settings for spawning ffmpeg processes
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Path or name of the ffmpeg executable
    pub binary: PathBuf,

    /// Maximum bytes per relayed chunk
    pub read_chunk_size: usize,

    /// How long ffmpeg gets to quit after `q` before it is killed
    pub stop_grace: Duration,

    /// Number of stderr lines kept for crash reports
    pub stderr_tail_lines: usize,

    /// Capacity of the per-process event channel
    pub event_capacity: usize,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            read_chunk_size: 16 * 1024,
            stop_grace: Duration::from_secs(3),
            stderr_tail_lines: 20,
            event_capacity: 256,
        }
    }
}

impl FfmpegConfig {
    /// Set the ffmpeg executable
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the maximum chunk size
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Set the grace period before a stopping process is killed
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

/// Transcoder that runs the ffmpeg executable
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    config: FfmpegConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FfmpegConfig {
        &self.config
    }
}

impl Transcoder for FfmpegTranscoder {
    fn start(
        &self,
        source_url: &str,
        options: &TranscodeOptions,
    ) -> Result<ProcessHandle, SpawnError> {
        let source = parse_source(source_url)?;
        options.validate()?;
        let args = options.to_args(&source);

        tracing::debug!(
            binary = %self.config.binary.display(),
            args = ?args,
            "Spawning transcoder"
        );

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SpawnError::BinaryNotFound {
                    binary: self.config.binary.display().to_string(),
                },
                _ => SpawnError::Io(e),
            })?;

        let missing = |pipe: &str| {
            SpawnError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("transcoder {} was not captured", pipe),
            ))
        };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let stdin = child.stdin.take();

        let pid = child.id();
        let (tx, rx) = mpsc::channel(self.config.event_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(supervise(
            child,
            stdin,
            stdout,
            stderr,
            tx,
            stop_rx,
            self.config.clone(),
        ));

        tracing::info!(pid = ?pid, source = %source, "Transcoder started");

        Ok(ProcessHandle::new(pid, rx, stop_tx, task))
    }
}

/// Owns the child process until it exits
async fn supervise(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<ProcessEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    config: FfmpegConfig,
) {
    let pid = child.id();
    let stderr_task = tokio::spawn(drain_stderr(
        stderr,
        tx.clone(),
        config.stderr_tail_lines,
        pid,
    ));

    let mut buf = BytesMut::with_capacity(config.read_chunk_size);
    let mut requested = false;

    let status = loop {
        buf.reserve(config.read_chunk_size);

        tokio::select! {
            // Fires on explicit stop and when the handle is dropped
            _ = &mut stop_rx => {
                requested = true;
                break stop_child(&mut child, stdin.take(), config.stop_grace).await;
            }
            read = stdout.read_buf(&mut buf) => match read {
                // Output closed; a live child gets the grace period to exit
                Ok(0) => break stop_child(&mut child, stdin.take(), config.stop_grace).await,
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    if tx.send(ProcessEvent::Data(chunk)).await.is_err() {
                        requested = true;
                        break stop_child(&mut child, stdin.take(), config.stop_grace).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(pid = ?pid, error = %e, "Transcoder stdout read failed, killing");
                    let _ = tx.send(ProcessEvent::Error(e.to_string())).await;
                    let _ = child.start_kill();
                    break child.wait().await.ok();
                }
            },
        }
    };

    let stderr_tail = match tokio::time::timeout(Duration::from_secs(1), stderr_task).await {
        Ok(Ok(lines)) => lines,
        _ => Vec::new(),
    };

    let exit = ProcessExit {
        code: status.and_then(|s| s.code()),
        requested,
        stderr_tail,
    };

    if exit.is_crash() {
        tracing::warn!(pid = ?pid, code = ?exit.code, "Transcoder exited unexpectedly");
    } else {
        tracing::debug!(pid = ?pid, code = ?exit.code, "Transcoder stopped");
    }

    let _ = tx.send(ProcessEvent::Exited(exit)).await;
}

/// Ask ffmpeg to quit, killing it if it does not exit within `grace`
async fn stop_child(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    grace: Duration,
) -> Option<ExitStatus> {
    if let Some(mut stdin) = stdin {
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.flush().await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => {
            let _ = child.start_kill();
            child.wait().await.ok()
        }
    }
}

/// Log stderr lines, report the output size, and return the tail
async fn drain_stderr(
    mut stderr: ChildStderr,
    tx: mpsc::Sender<ProcessEvent>,
    tail_lines: usize,
    pid: Option<u32>,
) -> Vec<String> {
    let mut splitter = LineSplitter::new();
    let mut probe = OutputProbe::new();
    let mut tail = StderrTail::new(tail_lines);
    let mut buf = [0u8; 4096];

    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        for line in splitter.push(&buf[..n]) {
            tracing::debug!(pid = ?pid, "ffmpeg: {}", line);
            if let Some((width, height)) = probe.inspect(&line) {
                let _ = tx.send(ProcessEvent::VideoSize { width, height }).await;
            }
            tail.push(line);
        }
    }

    if let Some(line) = splitter.finish() {
        tail.push(line);
    }

    tail.into_lines()
}
