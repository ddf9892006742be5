//! Messages delivered to viewer connections
//!
//! A viewer connection receives relayed chunks through a bounded queue. The
//! queue is the only coupling between the relay and the WebSocket task, so a
//! stalled socket can never hold up the relay.
//!
//! The terminal close travels in its own slot next to the queue. A viewer
//! whose queue is saturated still learns why it was closed.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

/// Why a viewer connection is being closed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The stream was stopped explicitly
    Stopped,
    /// The stream failed permanently
    Failed(String),
    /// The server is shutting down
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Stopped => write!(f, "stream stopped"),
            CloseReason::Failed(reason) => write!(f, "stream failed: {}", reason),
            CloseReason::Shutdown => write!(f, "server shutting down"),
        }
    }
}

/// A message received by one viewer
#[derive(Debug, Clone)]
pub enum ViewerMessage {
    /// Transcoded bytes, sent as one binary WebSocket message
    Chunk(Bytes),
    /// Terminal event; no further messages follow
    Closed(CloseReason),
}

/// Outcome of a non-blocking delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the viewer
    Sent,
    /// Viewer queue saturated, chunk dropped for this viewer only
    Dropped,
    /// Viewer connection is gone
    Disconnected,
}

/// Sending half of a viewer connection
///
/// Cheap to clone; the WebSocket task keeps the matching receiver.
#[derive(Debug, Clone)]
pub struct ViewerSink {
    chunks: mpsc::Sender<Bytes>,
    close: Arc<watch::Sender<Option<CloseReason>>>,
}

impl ViewerSink {
    /// Create a sink and the receiver the connection task drains
    pub fn channel(capacity: usize) -> (Self, ViewerReceiver) {
        let (chunks_tx, chunks_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = watch::channel(None);
        let sink = Self {
            chunks: chunks_tx,
            close: Arc::new(close_tx),
        };
        let receiver = ViewerReceiver {
            chunks: chunks_rx,
            close: close_rx,
            close_gone: false,
            finished: false,
        };
        (sink, receiver)
    }

    /// Queue a chunk without waiting
    pub fn try_deliver(&self, chunk: Bytes) -> Delivery {
        match self.chunks.try_send(chunk) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }

    /// Mark the connection closed
    ///
    /// Never blocked by a full queue. Only the first reason is kept.
    pub fn close(&self, reason: CloseReason) {
        self.close.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
            true
        });
    }

    /// Check whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.chunks.is_closed()
    }
}

/// Receiving half of a viewer connection
///
/// A close takes priority over queued chunks; chunks still waiting in the
/// queue when the close arrives are discarded.
#[derive(Debug)]
pub struct ViewerReceiver {
    chunks: mpsc::Receiver<Bytes>,
    close: watch::Receiver<Option<CloseReason>>,
    close_gone: bool,
    finished: bool,
}

impl ViewerReceiver {
    /// Wait for the next message
    ///
    /// Returns `None` after the terminal message, or once every sink is
    /// dropped without a close.
    pub async fn recv(&mut self) -> Option<ViewerMessage> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(message) = self.take_close() {
                return Some(message);
            }
            if self.close_gone {
                let chunk = self.chunks.recv().await;
                return self.chunk_or_end(chunk);
            }

            tokio::select! {
                biased;
                changed = self.close.changed() => {
                    if changed.is_err() {
                        self.close_gone = true;
                    }
                }
                chunk = self.chunks.recv() => return self.chunk_or_end(chunk),
            }
        }
    }

    /// Take the next message if one is ready
    pub fn try_recv(&mut self) -> Option<ViewerMessage> {
        if self.finished {
            return None;
        }
        if let Some(message) = self.take_close() {
            return Some(message);
        }
        self.chunks.try_recv().ok().map(ViewerMessage::Chunk)
    }

    fn take_close(&mut self) -> Option<ViewerMessage> {
        let reason = self.close.borrow_and_update().clone()?;
        self.finished = true;
        self.chunks.close();
        Some(ViewerMessage::Closed(reason))
    }

    fn chunk_or_end(&mut self, chunk: Option<Bytes>) -> Option<ViewerMessage> {
        match chunk {
            Some(chunk) => Some(ViewerMessage::Chunk(chunk)),
            None => {
                self.finished = true;
                None
            }
        }
    }
}
