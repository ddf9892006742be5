//! Scripted transcoder shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use rtsp_ws_relay::{ProcessEvent, ProcessExit, ProcessHandle, SpawnError, TranscodeOptions, Transcoder};

/// What a scripted process does once started
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Emit a chunk every few milliseconds until stopped
    Stream,
    /// Emit this many chunks, then exit with code 1
    CrashAfter(usize),
    /// Stream for this long, then exit with code 1
    CrashAfterRunning(Duration),
    /// Emit one chunk, report a failed output read, then hang until stopped
    BrokenOutput,
    /// Never produce output
    Silent,
}

/// Transcoder that runs an in-process script instead of ffmpeg
pub struct ScriptedTranscoder {
    script: Script,
    spawns: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

/// Counters observable after the transcoder moved into a manager
#[derive(Clone)]
pub struct Counters {
    spawns: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl Counters {
    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

impl ScriptedTranscoder {
    pub fn new(script: Script) -> (Self, Counters) {
        let spawns = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            spawns: Arc::clone(&spawns),
            running: Arc::clone(&running),
        };
        (
            Self {
                script,
                spawns,
                running,
            },
            counters,
        )
    }
}

/// Decrements the running count however the process task ends
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transcoder for ScriptedTranscoder {
    fn start(
        &self,
        source_url: &str,
        options: &TranscodeOptions,
    ) -> Result<ProcessHandle, SpawnError> {
        rtsp_ws_relay::transcode::parse_source(source_url)?;
        options.validate()?;

        let pid = self.spawns.fetch_add(1, Ordering::SeqCst) as u32 + 1000;
        self.running.fetch_add(1, Ordering::SeqCst);
        let guard = RunningGuard(Arc::clone(&self.running));

        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let script = self.script;

        let task = tokio::spawn(async move {
            let _guard = guard;
            let mut sent = 0usize;
            let started = tokio::time::Instant::now();

            if matches!(script, Script::BrokenOutput) {
                let _ = tx.send(ProcessEvent::Data(Bytes::from_static(b"chunk-0"))).await;
                let _ = tx.send(ProcessEvent::Error("broken pipe".to_string())).await;
                let _ = stop_rx.await;
                let _ = tx
                    .send(ProcessEvent::Exited(ProcessExit {
                        code: None,
                        requested: true,
                        stderr_tail: Vec::new(),
                    }))
                    .await;
                return;
            }

            let requested = loop {
                let limit_reached = match script {
                    Script::CrashAfter(n) => sent >= n,
                    Script::CrashAfterRunning(duration) => started.elapsed() >= duration,
                    _ => false,
                };
                if limit_reached {
                    break false;
                }

                tokio::select! {
                    _ = &mut stop_rx => break true,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {
                        if matches!(script, Script::Silent) {
                            continue;
                        }
                        let chunk = Bytes::from(format!("chunk-{}", sent));
                        if tx.send(ProcessEvent::Data(chunk)).await.is_err() {
                            return;
                        }
                        sent += 1;
                    }
                }
            };

            let _ = tx
                .send(ProcessEvent::Exited(ProcessExit {
                    code: Some(if requested { 0 } else { 1 }),
                    requested,
                    stderr_tail: vec!["scripted exit".to_string()],
                }))
                .await;
        });

        Ok(ProcessHandle::new(Some(pid), rx, stop_tx, task))
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
