//! Viewer entry types
//!
//! This module defines the per-viewer state stored in the registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;

use super::message::{CloseReason, Delivery, ViewerSink};

/// Identifier assigned to each viewer connection
pub type ViewerId = u64;

/// A connected viewer
#[derive(Debug)]
pub struct Viewer {
    /// Unique viewer ID
    pub id: ViewerId,

    /// Name of the stream the viewer joined
    pub stream: String,

    /// Remote peer address, when known
    pub peer_addr: Option<SocketAddr>,

    /// When the viewer joined
    pub joined_at: Instant,

    /// Outbound queue to the connection task
    sink: ViewerSink,

    /// Chunks queued for this viewer
    delivered: AtomicU64,

    /// Chunks dropped because the viewer queue was saturated
    dropped: AtomicU64,
}

impl Viewer {
    pub(super) fn new(
        id: ViewerId,
        stream: impl Into<String>,
        sink: ViewerSink,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id,
            stream: stream.into(),
            peer_addr,
            joined_at: Instant::now(),
            sink,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a chunk for this viewer without blocking, updating counters
    pub fn deliver(&self, chunk: Bytes) -> Delivery {
        let outcome = self.sink.try_deliver(chunk);
        match outcome {
            Delivery::Sent => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Disconnected => {}
        }
        outcome
    }

    /// Hand this viewer its terminal message
    pub(super) fn close(&self, reason: CloseReason) {
        self.sink.close(reason);
    }

    /// Number of chunks queued for this viewer
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of chunks dropped for this viewer
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Snapshot for status reporting
    pub fn info(&self) -> ViewerInfo {
        ViewerInfo {
            id: self.id,
            stream: self.stream.clone(),
            peer_addr: self.peer_addr.map(|addr| addr.to_string()),
            connected_secs: self.joined_at.elapsed().as_secs(),
            delivered: self.delivered(),
            dropped: self.dropped(),
        }
    }
}

/// Serializable view of a viewer
#[derive(Debug, Clone, Serialize)]
pub struct ViewerInfo {
    pub id: ViewerId,
    pub stream: String,
    pub peer_addr: Option<String>,
    pub connected_secs: u64,
    pub delivered: u64,
    pub dropped: u64,
}
