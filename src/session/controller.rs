//! Per-stream session controller
//!
//! Each session runs as one task that owns the stream's transcoder and
//! relay. Other tasks talk to it through [`SessionCommand`]s and observe it
//! through a `watch` channel of [`SessionStatus`] and the manager's event
//! broadcast.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::registry::{CloseReason, ViewerRegistry};
use crate::relay::FrameRelay;
use crate::stats::{RelayCounters, RelayStats};
use crate::transcode::{ProcessEvent, ProcessHandle, Transcoder};

use super::config::SessionConfig;
use super::error::SessionError;
use super::event::SessionEvent;
use super::state::{SessionState, SessionStatus};

/// Command sent to a session task
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// The stream gained its first viewer
    Activate,
    /// The stream lost its last viewer
    Deactivate,
    /// Stop the transcoder and close all viewers; acknowledged when done
    Stop(oneshot::Sender<()>),
    /// End the session task
    Shutdown,
}

/// Cloneable control side of a session
#[derive(Debug, Clone)]
pub struct SessionControl {
    name: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionControl {
    pub(crate) fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Stop the stream, closing every viewer, and wait until it is idle
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (done_tx, done_rx) = oneshot::channel();
        if !self.send(SessionCommand::Stop(done_tx)) {
            return Err(SessionError::SessionGone(self.name.clone()));
        }
        done_rx
            .await
            .map_err(|_| SessionError::SessionGone(self.name.clone()))
    }
}

/// Handle to a running session task
pub struct SessionHandle {
    config: Arc<SessionConfig>,
    control: SessionControl,
    status: watch::Receiver<SessionStatus>,
    counters: Arc<RelayCounters>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn the session task in the idle state
    ///
    /// The greeting for the configured output size is in place before this
    /// returns, so no viewer can join ahead of it.
    pub async fn spawn<T: Transcoder>(
        config: Arc<SessionConfig>,
        transcoder: Arc<T>,
        registry: Arc<ViewerRegistry>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::new());
        let relay = FrameRelay::new(config.name.clone(), Arc::clone(&registry));
        let counters = Arc::clone(relay.counters());

        if config.jsmpeg_greeting {
            if let Some(res) = config.transcode.resolution {
                relay.publish_greeting(res.width, res.height).await;
            }
        }

        let controller = SessionController {
            config: Arc::clone(&config),
            transcoder,
            registry,
            relay,
            events,
            status: status_tx,
            commands: commands_rx,
            process: None,
            streaming_since: None,
            pending_stop: None,
        };

        let task = tokio::spawn(controller.run());

        Self {
            control: SessionControl {
                name: config.name.clone(),
                commands: commands_tx,
            },
            config,
            status: status_rx,
            counters,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &Arc<SessionConfig> {
        &self.config
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.counters.snapshot()
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    /// Whether the session task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// End the task without waiting for it
    pub(crate) fn retire(&self) {
        self.control.send(SessionCommand::Shutdown);
    }

    /// End the task, waiting up to `timeout` before aborting it
    ///
    /// Aborting drops the transcoder handle, which kills the process.
    pub async fn shutdown(self, timeout: Duration) {
        self.control.send(SessionCommand::Shutdown);

        let mut task = self.task;
        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            tracing::warn!(stream = %self.config.name, "Session did not shut down in time, aborting");
            task.abort();
        }
    }
}

enum Wake {
    Command(Option<SessionCommand>),
    Process(Option<ProcessEvent>),
    Timer,
}

/// The session task's state
struct SessionController<T: Transcoder> {
    config: Arc<SessionConfig>,
    transcoder: Arc<T>,
    registry: Arc<ViewerRegistry>,
    relay: FrameRelay,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    process: Option<ProcessHandle>,
    streaming_since: Option<Instant>,
    pending_stop: Option<oneshot::Sender<()>>,
}

/// Next event of the running process; never resolves when there is none
async fn next_process_event(process: &mut Option<ProcessHandle>) -> Option<ProcessEvent> {
    match process {
        Some(process) => process.next_event().await,
        None => std::future::pending().await,
    }
}

impl<T: Transcoder> SessionController<T> {
    async fn run(mut self) {
        tracing::info!(
            stream = %self.config.name,
            "Session created"
        );

        loop {
            let flow = match self.state() {
                SessionState::Idle => self.on_idle().await,
                SessionState::Starting => self.on_starting().await,
                SessionState::Streaming => self.on_streaming().await,
                SessionState::Stopping => self.on_stopping().await,
                SessionState::Failed => self.on_failed().await,
            };
            if flow.is_break() {
                break;
            }
        }

        self.terminate_process().await;
        if let Some(done) = self.pending_stop.take() {
            let _ = done.send(());
        }

        tracing::info!(stream = %self.config.name, "Session ended");
    }

    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: SessionState) {
        let current = self.state();
        let mut changed = false;
        self.status.send_modify(|status| changed = status.transition(next));

        if changed {
            tracing::debug!(
                stream = %self.config.name,
                from = %current,
                to = %next,
                "Session state changed"
            );
            self.emit(SessionEvent::StateChanged {
                stream: self.config.name.clone(),
                state: next,
            });
        } else if current != next {
            tracing::warn!(
                stream = %self.config.name,
                from = %current,
                to = %next,
                "Rejected session state transition"
            );
        }
    }

    async fn viewer_count(&self) -> usize {
        self.registry.viewer_count(&self.config.name).await
    }

    async fn on_idle(&mut self) -> ControlFlow<()> {
        match self.commands.recv().await {
            None | Some(SessionCommand::Shutdown) => ControlFlow::Break(()),
            Some(SessionCommand::Activate) => {
                if self.viewer_count().await > 0 {
                    self.set_state(SessionState::Starting);
                }
                ControlFlow::Continue(())
            }
            Some(SessionCommand::Deactivate) => ControlFlow::Continue(()),
            Some(SessionCommand::Stop(done)) => {
                self.registry
                    .close_all(&self.config.name, CloseReason::Stopped)
                    .await;
                let _ = done.send(());
                ControlFlow::Continue(())
            }
        }
    }

    async fn on_starting(&mut self) -> ControlFlow<()> {
        let attempt = self.status.borrow().restarts;

        match self
            .transcoder
            .start(&self.config.source_url, &self.config.transcode)
        {
            Ok(process) => {
                let pid = process.pid();
                self.status.send_modify(|status| status.pid = pid);
                tracing::info!(
                    stream = %self.config.name,
                    pid = ?pid,
                    attempt = attempt,
                    "Transcoder spawned"
                );
                self.emit(SessionEvent::ProcessStarted {
                    stream: self.config.name.clone(),
                    pid,
                    attempt,
                });
                self.process = Some(process);
            }
            Err(err) => {
                let error = err.to_string();
                tracing::error!(
                    stream = %self.config.name,
                    error = %error,
                    "Failed to spawn transcoder"
                );
                self.emit(SessionEvent::SpawnFailed {
                    stream: self.config.name.clone(),
                    error: error.clone(),
                });
                self.fail_permanently(error).await;
                return ControlFlow::Continue(());
            }
        }

        let ready_timeout = self.config.ready_timeout;
        let deadline = tokio::time::sleep(ready_timeout);
        tokio::pin!(deadline);

        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                event = next_process_event(&mut self.process) => Wake::Process(event),
                _ = &mut deadline => Wake::Timer,
            };

            match wake {
                Wake::Command(command) => {
                    if let Some(flow) = self.on_running_command(command).await {
                        return flow;
                    }
                }
                Wake::Process(Some(ProcessEvent::Data(chunk))) => {
                    self.streaming_since = Some(Instant::now());
                    self.set_state(SessionState::Streaming);
                    self.relay_chunk(chunk).await;
                    return ControlFlow::Continue(());
                }
                Wake::Process(Some(event)) => {
                    if let Some(flow) = self.on_process_event(event).await {
                        return flow;
                    }
                }
                Wake::Process(None) => {
                    self.process = None;
                    self.crashed("transcoder supervisor ended unexpectedly".to_string());
                    return ControlFlow::Continue(());
                }
                Wake::Timer => {
                    self.terminate_process().await;
                    self.crashed(format!(
                        "transcoder produced no output within {:?}",
                        ready_timeout
                    ));
                    return ControlFlow::Continue(());
                }
            }
        }
    }

    async fn on_streaming(&mut self) -> ControlFlow<()> {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                event = next_process_event(&mut self.process) => Wake::Process(event),
            };

            match wake {
                Wake::Command(command) => {
                    if let Some(flow) = self.on_running_command(command).await {
                        return flow;
                    }
                }
                Wake::Process(Some(ProcessEvent::Data(chunk))) => {
                    self.relay_chunk(chunk).await;
                }
                Wake::Process(Some(event)) => {
                    if let Some(flow) = self.on_process_event(event).await {
                        return flow;
                    }
                }
                Wake::Process(None) => {
                    self.process = None;
                    self.crashed("transcoder supervisor ended unexpectedly".to_string());
                    return ControlFlow::Continue(());
                }
                Wake::Timer => {}
            }
        }
    }

    async fn on_stopping(&mut self) -> ControlFlow<()> {
        self.terminate_process().await;
        self.streaming_since = None;
        self.status.send_modify(|status| {
            status.restarts = 0;
            status.pid = None;
        });

        if let Some(done) = self.pending_stop.take() {
            self.registry
                .close_all(&self.config.name, CloseReason::Stopped)
                .await;
            self.set_state(SessionState::Idle);
            let _ = done.send(());
            return ControlFlow::Continue(());
        }

        self.set_state(SessionState::Idle);

        // A viewer may have joined while the old process was shutting down
        if self.viewer_count().await > 0 {
            self.set_state(SessionState::Starting);
        }

        ControlFlow::Continue(())
    }

    async fn on_failed(&mut self) -> ControlFlow<()> {
        let (restarts, terminal, error) = {
            let status = self.status.borrow();
            (
                status.restarts,
                status.terminal,
                status.last_error.clone().unwrap_or_default(),
            )
        };

        if terminal {
            return self.on_terminal().await;
        }

        if restarts >= self.config.retry.max_restarts {
            self.emit(SessionEvent::ProcessFailed {
                stream: self.config.name.clone(),
                error: error.clone(),
                restart_in: None,
            });
            self.fail_permanently(error).await;
            return ControlFlow::Continue(());
        }

        if self.viewer_count().await == 0 {
            self.status.send_modify(|status| status.restarts = 0);
            self.set_state(SessionState::Idle);
            return ControlFlow::Continue(());
        }

        let delay = self.config.retry.delay_for(restarts);
        tracing::info!(
            stream = %self.config.name,
            attempt = restarts + 1,
            max = self.config.retry.max_restarts,
            delay_ms = delay.as_millis() as u64,
            "Restarting transcoder after backoff"
        );
        self.emit(SessionEvent::ProcessFailed {
            stream: self.config.name.clone(),
            error,
            restart_in: Some(delay),
        });

        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);

        loop {
            let wake = tokio::select! {
                _ = &mut backoff => Wake::Timer,
                command = self.commands.recv() => Wake::Command(command),
            };

            match wake {
                Wake::Timer => {
                    self.status.send_modify(|status| status.restarts += 1);
                    self.set_state(SessionState::Starting);
                    return ControlFlow::Continue(());
                }
                Wake::Command(None) | Wake::Command(Some(SessionCommand::Shutdown)) => {
                    return ControlFlow::Break(());
                }
                Wake::Command(Some(SessionCommand::Activate)) => {}
                Wake::Command(Some(SessionCommand::Deactivate)) => {
                    if self.viewer_count().await == 0 {
                        self.status.send_modify(|status| status.restarts = 0);
                        self.set_state(SessionState::Idle);
                        return ControlFlow::Continue(());
                    }
                }
                Wake::Command(Some(SessionCommand::Stop(done))) => {
                    self.registry
                        .close_all(&self.config.name, CloseReason::Stopped)
                        .await;
                    self.status.send_modify(|status| status.restarts = 0);
                    self.set_state(SessionState::Idle);
                    let _ = done.send(());
                    return ControlFlow::Continue(());
                }
                Wake::Process(_) => {}
            }
        }
    }

    /// Permanently failed: no retries until the session is stopped
    async fn on_terminal(&mut self) -> ControlFlow<()> {
        match self.commands.recv().await {
            None | Some(SessionCommand::Shutdown) => ControlFlow::Break(()),
            Some(SessionCommand::Activate) => {
                // Viewers that slipped in after the failure
                let error = self.status.borrow().last_error.clone().unwrap_or_default();
                self.registry
                    .close_all(&self.config.name, CloseReason::Failed(error))
                    .await;
                ControlFlow::Continue(())
            }
            Some(SessionCommand::Deactivate) => ControlFlow::Continue(()),
            Some(SessionCommand::Stop(done)) => {
                self.status.send_modify(|status| status.restarts = 0);
                self.set_state(SessionState::Idle);
                let _ = done.send(());
                ControlFlow::Continue(())
            }
        }
    }

    /// Handle a command while a transcoder is starting or streaming
    async fn on_running_command(
        &mut self,
        command: Option<SessionCommand>,
    ) -> Option<ControlFlow<()>> {
        match command {
            None | Some(SessionCommand::Shutdown) => Some(ControlFlow::Break(())),
            Some(SessionCommand::Activate) => None,
            Some(SessionCommand::Deactivate) => {
                if self.viewer_count().await == 0 {
                    tracing::info!(stream = %self.config.name, "Last viewer left, stopping transcoder");
                    self.set_state(SessionState::Stopping);
                    Some(ControlFlow::Continue(()))
                } else {
                    None
                }
            }
            Some(SessionCommand::Stop(done)) => {
                tracing::info!(stream = %self.config.name, "Stop requested");
                self.pending_stop = Some(done);
                self.set_state(SessionState::Stopping);
                Some(ControlFlow::Continue(()))
            }
        }
    }

    /// Handle a non-data process event
    async fn on_process_event(&mut self, event: ProcessEvent) -> Option<ControlFlow<()>> {
        match event {
            ProcessEvent::Data(chunk) => {
                self.relay_chunk(chunk).await;
                None
            }
            ProcessEvent::VideoSize { width, height } => {
                tracing::info!(
                    stream = %self.config.name,
                    width = width,
                    height = height,
                    "Transcoder output size detected"
                );
                if self.config.jsmpeg_greeting {
                    self.relay.publish_greeting(width, height).await;
                }
                None
            }
            ProcessEvent::Error(error) => {
                tracing::warn!(stream = %self.config.name, error = %error, "Transcoder output failed");
                self.terminate_process().await;
                self.crashed(format!("transcoder output failed: {}", error));
                Some(ControlFlow::Continue(()))
            }
            ProcessEvent::Exited(exit) => {
                self.process = None;
                self.crashed(exit.describe());
                Some(ControlFlow::Continue(()))
            }
        }
    }

    async fn relay_chunk(&self, chunk: Bytes) {
        let bytes = chunk.len();
        let outcome = self.relay.deliver(chunk).await;
        self.emit(SessionEvent::ChunkRelayed {
            stream: self.config.name.clone(),
            bytes,
            viewers: outcome.delivered,
        });
    }

    /// Record an unrequested process exit and enter the failed state
    fn crashed(&mut self, reason: String) {
        let stable = self
            .streaming_since
            .take()
            .is_some_and(|since| since.elapsed() >= self.config.retry.reset_after);

        tracing::warn!(
            stream = %self.config.name,
            reason = %reason,
            "Transcoder crashed"
        );

        self.status.send_modify(|status| {
            if stable {
                status.restarts = 0;
            }
            status.last_error = Some(reason);
            status.pid = None;
        });
        self.set_state(SessionState::Failed);
    }

    /// Give up on the session and close every viewer with the error
    async fn fail_permanently(&mut self, error: String) {
        self.terminate_process().await;
        self.streaming_since = None;

        tracing::error!(
            stream = %self.config.name,
            error = %error,
            "Session failed permanently"
        );

        self.status.send_modify(|status| {
            status.terminal = true;
            status.last_error = Some(error.clone());
            status.pid = None;
        });
        self.set_state(SessionState::Failed);

        self.emit(SessionEvent::PermanentFailure {
            stream: self.config.name.clone(),
            error: error.clone(),
        });
        self.registry
            .close_all(&self.config.name, CloseReason::Failed(error))
            .await;
    }

    async fn terminate_process(&mut self) {
        let Some(process) = self.process.take() else {
            return;
        };

        let pid = process.pid();
        match process.stop(self.config.stop_timeout).await {
            Some(exit) => tracing::debug!(
                stream = %self.config.name,
                pid = ?pid,
                code = ?exit.code,
                "Transcoder exit confirmed"
            ),
            None => tracing::warn!(
                stream = %self.config.name,
                pid = ?pid,
                "Transcoder exit not confirmed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ViewerMessage, ViewerSink};
    use crate::transcode::{ProcessExit, SpawnError, TranscodeOptions};

    /// Emits one chunk every few milliseconds until stopped
    struct TickingTranscoder;

    impl Transcoder for TickingTranscoder {
        fn start(&self, _: &str, _: &TranscodeOptions) -> Result<ProcessHandle, SpawnError> {
            let (tx, rx) = mpsc::channel(16);
            let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
            let task = tokio::spawn(async move {
                let mut n = 0u8;
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {
                            n = n.wrapping_add(1);
                            if tx.send(ProcessEvent::Data(Bytes::from(vec![n]))).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                let _ = tx
                    .send(ProcessEvent::Exited(ProcessExit {
                        code: Some(0),
                        requested: true,
                        stderr_tail: Vec::new(),
                    }))
                    .await;
            });
            Ok(ProcessHandle::new(Some(1), rx, stop_tx, task))
        }
    }

    async fn wait_for(
        status: &mut watch::Receiver<SessionStatus>,
        state: SessionState,
    ) -> SessionStatus {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if status.borrow_and_update().state == state {
                    return status.borrow().clone();
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session never reached {}", state))
    }

    #[tokio::test]
    async fn test_activate_streams_and_deactivate_stops() {
        let registry = Arc::new(ViewerRegistry::new());
        let (events, _) = broadcast::channel(64);
        let config = Arc::new(
            SessionConfig::new("cam", "rtsp://127.0.0.1/test").jsmpeg_greeting(false),
        );
        let handle = SessionHandle::spawn(
            config,
            Arc::new(TickingTranscoder),
            Arc::clone(&registry),
            events,
        )
        .await;
        let mut status = handle.watch();

        let (sink, mut rx) = ViewerSink::channel(64);
        registry.subscribe("cam", 1, sink, None).await.unwrap();
        handle.control().send(SessionCommand::Activate);

        wait_for(&mut status, SessionState::Streaming).await;
        assert!(matches!(rx.recv().await, Some(ViewerMessage::Chunk(_))));

        registry.unsubscribe("cam", 1).await;
        handle.control().send(SessionCommand::Deactivate);

        let idle = wait_for(&mut status, SessionState::Idle).await;
        assert!(idle.pid.is_none());
        assert!(handle.relay_stats().chunks_in > 0);

        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stop_closes_viewers() {
        let registry = Arc::new(ViewerRegistry::new());
        let (events, _) = broadcast::channel(64);
        let config = Arc::new(SessionConfig::new("cam", "rtsp://127.0.0.1/test"));
        let handle = SessionHandle::spawn(
            config,
            Arc::new(TickingTranscoder),
            Arc::clone(&registry),
            events,
        )
        .await;
        let mut status = handle.watch();

        let (sink, mut rx) = ViewerSink::channel(1024);
        registry.subscribe("cam", 1, sink, None).await.unwrap();
        handle.control().send(SessionCommand::Activate);
        wait_for(&mut status, SessionState::Streaming).await;

        handle.control().stop().await.unwrap();
        assert_eq!(handle.status().state, SessionState::Idle);
        assert_eq!(registry.viewer_count("cam").await, 0);

        // Drain to the terminal message
        let mut closed = false;
        while let Some(message) = rx.recv().await {
            if let ViewerMessage::Closed(reason) = message {
                assert_eq!(reason, CloseReason::Stopped);
                closed = true;
            }
        }
        assert!(closed);

        handle.shutdown(Duration::from_secs(1)).await;
    }
}
