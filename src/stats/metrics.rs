//! Statistics for relayed streams

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one stream's relay
///
/// Updated by the session task, read by status requests.
#[derive(Debug, Default)]
pub struct RelayCounters {
    chunks_in: AtomicU64,
    bytes_in: AtomicU64,
    deliveries: AtomicU64,
    drops: AtomicU64,
    disconnects: AtomicU64,
}

impl RelayCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one chunk read from the transcoder
    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record the outcome of fanning a chunk out
    pub fn record_fan_out(&self, delivered: usize, dropped: usize, disconnected: usize) {
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.drops.fetch_add(dropped as u64, Ordering::Relaxed);
        self.disconnects.fetch_add(disconnected as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            chunks_in: self.chunks_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time relay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Chunks read from the transcoder
    pub chunks_in: u64,
    /// Bytes read from the transcoder
    pub bytes_in: u64,
    /// Chunk copies queued to viewers
    pub deliveries: u64,
    /// Chunk copies dropped for saturated viewers
    pub drops: u64,
    /// Viewers found disconnected during delivery
    pub disconnects: u64,
}
