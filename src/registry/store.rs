//! Viewer registry implementation
//!
//! The central registry that tracks which viewers are attached to which
//! stream, and tells the session layer when a stream gains its first viewer
//! or loses its last one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use super::error::RegistryError;
use super::message::{CloseReason, ViewerSink};
use super::viewer::{Viewer, ViewerId, ViewerInfo};

/// Notification emitted when a stream's viewer count crosses zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The stream went from zero to one viewer
    Occupied { stream: String },
    /// The stream went from one to zero viewers
    Vacated { stream: String },
}

/// Viewers of a single stream
#[derive(Default)]
struct StreamViewers {
    viewers: HashMap<ViewerId, Arc<Viewer>>,

    /// Sent to every new viewer before any relayed chunk
    greeting: Option<Bytes>,
}

/// Registry of all viewer connections, keyed by stream name
///
/// All membership changes go through one `RwLock`. Transition events are
/// sent while that lock is held, so listeners observe them in the same order
/// the membership changed.
pub struct ViewerRegistry {
    streams: RwLock<HashMap<String, StreamViewers>>,
    next_viewer_id: AtomicU64,
    events: Option<mpsc::UnboundedSender<RegistryEvent>>,
}

impl ViewerRegistry {
    /// Create a registry that emits no transition events
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_viewer_id: AtomicU64::new(1),
            events: None,
        }
    }

    /// Create a registry and the receiver for its transition events
    pub fn with_listener() -> (Self, mpsc::UnboundedReceiver<RegistryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            events: Some(tx),
            ..Self::new()
        };
        (registry, rx)
    }

    /// Allocate a fresh viewer ID
    pub fn next_viewer_id(&self) -> ViewerId {
        self.next_viewer_id.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: RegistryEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }

    /// Add a viewer to a stream
    ///
    /// If the stream has a greeting it is queued for the viewer before the
    /// viewer becomes visible to the relay, so it always arrives first.
    pub async fn subscribe(
        &self,
        stream: &str,
        viewer_id: ViewerId,
        sink: ViewerSink,
        peer_addr: Option<SocketAddr>,
    ) -> Result<Arc<Viewer>, RegistryError> {
        if sink.is_closed() {
            return Err(RegistryError::ConnectionClosed(stream.to_string()));
        }

        let mut streams = self.streams.write().await;
        let entry = streams.entry(stream.to_string()).or_default();

        if entry.viewers.contains_key(&viewer_id) {
            return Err(RegistryError::DuplicateViewer {
                stream: stream.to_string(),
                viewer_id,
            });
        }

        let viewer = Arc::new(Viewer::new(viewer_id, stream, sink, peer_addr));
        if let Some(ref greeting) = entry.greeting {
            viewer.deliver(greeting.clone());
        }

        entry.viewers.insert(viewer_id, Arc::clone(&viewer));
        let count = entry.viewers.len();

        tracing::info!(
            stream = %stream,
            viewer_id = viewer_id,
            peer = ?peer_addr,
            viewers = count,
            "Viewer subscribed"
        );

        if count == 1 {
            self.emit(RegistryEvent::Occupied {
                stream: stream.to_string(),
            });
        }

        Ok(viewer)
    }

    /// Remove a viewer from a stream
    ///
    /// Returns the removed viewer, or `None` if it was not subscribed.
    pub async fn unsubscribe(&self, stream: &str, viewer_id: ViewerId) -> Option<Arc<Viewer>> {
        let mut streams = self.streams.write().await;
        let entry = streams.get_mut(stream)?;
        let viewer = entry.viewers.remove(&viewer_id)?;
        let remaining = entry.viewers.len();

        tracing::info!(
            stream = %stream,
            viewer_id = viewer_id,
            viewers = remaining,
            delivered = viewer.delivered(),
            dropped = viewer.dropped(),
            "Viewer unsubscribed"
        );

        if remaining == 0 {
            self.emit(RegistryEvent::Vacated {
                stream: stream.to_string(),
            });
        }

        Some(viewer)
    }

    /// Remove every viewer of a stream, handing each its terminal message
    pub async fn close_all(&self, stream: &str, reason: CloseReason) -> usize {
        let mut streams = self.streams.write().await;
        let Some(entry) = streams.get_mut(stream) else {
            return 0;
        };

        let closed = entry.viewers.len();
        for (_, viewer) in entry.viewers.drain() {
            viewer.close(reason.clone());
        }

        if closed > 0 {
            tracing::info!(
                stream = %stream,
                viewers = closed,
                reason = %reason,
                "Closed all viewers"
            );
            self.emit(RegistryEvent::Vacated {
                stream: stream.to_string(),
            });
        }

        closed
    }

    /// Current viewers of a stream
    pub async fn snapshot(&self, stream: &str) -> Vec<Arc<Viewer>> {
        let streams = self.streams.read().await;
        streams
            .get(stream)
            .map(|entry| entry.viewers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of viewers of a stream
    pub async fn viewer_count(&self, stream: &str) -> usize {
        let streams = self.streams.read().await;
        streams.get(stream).map_or(0, |entry| entry.viewers.len())
    }

    /// Number of viewers across all streams
    pub async fn total_viewers(&self) -> usize {
        let streams = self.streams.read().await;
        streams.values().map(|entry| entry.viewers.len()).sum()
    }

    /// Status snapshots of the viewers of a stream
    pub async fn viewers(&self, stream: &str) -> Vec<ViewerInfo> {
        let mut infos: Vec<ViewerInfo> = self
            .snapshot(stream)
            .await
            .iter()
            .map(|viewer| viewer.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Set or clear the greeting sent to new viewers of a stream
    pub async fn set_greeting(&self, stream: &str, greeting: Option<Bytes>) {
        let mut streams = self.streams.write().await;
        streams.entry(stream.to_string()).or_default().greeting = greeting;
    }

    /// Forget a stream that has no viewers
    ///
    /// Returns `false` (and keeps the stream) if viewers are still attached.
    pub async fn remove_stream(&self, stream: &str) -> bool {
        let mut streams = self.streams.write().await;
        match streams.get(stream) {
            Some(entry) if !entry.viewers.is_empty() => false,
            Some(_) => {
                streams.remove(stream);
                true
            }
            None => true,
        }
    }
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
