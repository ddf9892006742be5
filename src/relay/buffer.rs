//! Frame relay for one stream
//!
//! Delivery is non-blocking: each viewer has a bounded queue, and a full
//! queue costs that viewer the chunk rather than stalling the relay. Viewers
//! whose connection has gone away are unsubscribed on the spot.

use std::sync::Arc;

use bytes::Bytes;

use crate::registry::{Delivery, ViewerId, ViewerRegistry};
use crate::stats::{RelayCounters, RelayStats};

use super::greeting::jsmpeg_header;

/// Result of relaying one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Viewers the chunk was queued for
    pub delivered: usize,
    /// Viewers that missed the chunk because their queue was full
    pub dropped: usize,
    /// Viewers removed because their connection had closed
    pub disconnected: Vec<ViewerId>,
}

impl FanOut {
    /// Number of viewers the chunk was offered to
    pub fn viewers(&self) -> usize {
        self.delivered + self.dropped + self.disconnected.len()
    }
}

/// Fans transcoded chunks out to the viewers of one stream
pub struct FrameRelay {
    stream: String,
    registry: Arc<ViewerRegistry>,
    counters: Arc<RelayCounters>,
}

impl FrameRelay {
    pub fn new(stream: impl Into<String>, registry: Arc<ViewerRegistry>) -> Self {
        Self {
            stream: stream.into(),
            registry,
            counters: Arc::new(RelayCounters::new()),
        }
    }

    /// Name of the stream this relay serves
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Shared counters, readable while the relay runs
    pub fn counters(&self) -> &Arc<RelayCounters> {
        &self.counters
    }

    pub fn stats(&self) -> RelayStats {
        self.counters.snapshot()
    }

    /// Relay one chunk to every current viewer
    pub async fn deliver(&self, chunk: Bytes) -> FanOut {
        self.counters.record_chunk(chunk.len());

        let mut outcome = FanOut::default();
        for viewer in self.registry.snapshot(&self.stream).await {
            match viewer.deliver(chunk.clone()) {
                Delivery::Sent => outcome.delivered += 1,
                Delivery::Dropped => {
                    outcome.dropped += 1;
                    tracing::trace!(
                        stream = %self.stream,
                        viewer_id = viewer.id,
                        "Viewer queue full, chunk dropped"
                    );
                }
                Delivery::Disconnected => outcome.disconnected.push(viewer.id),
            }
        }

        for &viewer_id in &outcome.disconnected {
            tracing::debug!(stream = %self.stream, viewer_id = viewer_id, "Viewer connection dropped");
            self.registry.unsubscribe(&self.stream, viewer_id).await;
        }

        self.counters.record_fan_out(
            outcome.delivered,
            outcome.dropped,
            outcome.disconnected.len(),
        );

        outcome
    }

    /// Publish the JSMpeg greeting for viewers that join from now on
    pub async fn publish_greeting(&self, width: u16, height: u16) {
        tracing::debug!(stream = %self.stream, width = width, height = height, "Stream greeting set");
        self.registry
            .set_greeting(&self.stream, Some(jsmpeg_header(width, height)))
            .await;
    }
}
