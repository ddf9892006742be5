//! Running transcoder processes
//!
//! A [`ProcessHandle`] is the controller's only view of a transcoder: an
//! ordered event stream plus a way to stop it. Whatever supervises the OS
//! process lives in a task owned by the handle; dropping the handle aborts
//! that task, and the task's process is killed on drop.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Event emitted by a running transcoder, in output order
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A chunk of transcoded output
    Data(Bytes),

    /// Output video size, as reported by the transcoder
    VideoSize { width: u16, height: u16 },

    /// Reading process output failed; the output is lost for good
    Error(String),

    /// The process exited; no events follow
    Exited(ProcessExit),
}

/// How a transcoder process ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,

    /// Whether the exit was requested through [`ProcessHandle::stop`]
    pub requested: bool,

    /// Last lines the process wrote to stderr
    pub stderr_tail: Vec<String>,
}

impl ProcessExit {
    /// An exit nobody asked for, including a clean end of the source
    pub fn is_crash(&self) -> bool {
        !self.requested
    }

    /// One-line description for logs and viewer close frames
    pub fn describe(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
        };
        match self.stderr_tail.last() {
            Some(line) => format!("transcoder {}: {}", status, line),
            None => format!("transcoder {}", status),
        }
    }
}

/// Handle to a running transcoder process
pub struct ProcessHandle {
    pid: Option<u32>,
    events: mpsc::Receiver<ProcessEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Assemble a handle from its parts
    ///
    /// `task` must finish after sending [`ProcessEvent::Exited`] once
    /// `stop_tx` fires or is dropped.
    pub fn new(
        pid: Option<u32>,
        events: mpsc::Receiver<ProcessEvent>,
        stop_tx: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            pid,
            events,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// OS process ID, if the process has one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the supervising task is gone.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Stop the process and wait for it to exit
    ///
    /// Output produced while stopping is discarded. If the process does not
    /// confirm its exit within `timeout` the supervising task is aborted,
    /// which kills the process.
    pub async fn stop(mut self, timeout: Duration) -> Option<ProcessExit> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let events = &mut self.events;
        let confirmed = tokio::time::timeout(timeout, async {
            while let Some(event) = events.recv().await {
                if let ProcessEvent::Exited(exit) = event {
                    return Some(exit);
                }
            }
            None
        })
        .await;

        let exit = match confirmed {
            Ok(exit) => exit,
            Err(_) => {
                tracing::warn!(pid = ?self.pid, "Transcoder did not exit in time, killing");
                None
            }
        };

        if let Some(task) = self.task.take() {
            if exit.is_none() {
                task.abort();
            }
            let _ = task.await;
        }

        exit
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("running", &self.task.is_some())
            .finish()
    }
}
